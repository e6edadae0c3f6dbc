use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally authored status stages, in escalation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponderStage {
    Dispatched,
    EnRoute,
    OnScene,
    Resolved,
}

impl ResponderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponderStage::Dispatched => "DISPATCHED",
            ResponderStage::EnRoute => "EN_ROUTE",
            ResponderStage::OnScene => "ON_SCENE",
            ResponderStage::Resolved => "RESOLVED",
        }
    }
}

/// An externally reported status update tied to one incident. Append-only;
/// the latest by `created_at` is the current display stage. The core only
/// reacts to `Resolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderAction {
    pub id: String,
    pub incident_id: String,
    pub action: ResponderStage,
    pub created_at: DateTime<Utc>,
}
