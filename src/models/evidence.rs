use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audio recording, tied to an incident when captured during one.
/// Immutable once created; the remote storage path is backfilled by a
/// best-effort upload that never rolls back the local record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceClip {
    pub id: String,
    pub incident_id: Option<String>,
    pub local_uri: String,
    pub remote_storage_path: Option<String>,
    pub duration_label: String,
    pub recorded_at: DateTime<Utc>,
}
