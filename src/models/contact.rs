use serde::{Deserialize, Serialize};

/// A trusted contact registered to receive alert notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedContact {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub relation: Option<String>,
    pub is_primary: bool,
}
