use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "ACTIVE",
            IncidentStatus::Resolved => "RESOLVED",
        }
    }
}

/// One emergency episode for one user, from confirmation to resolution.
///
/// At most one incident per user may be `Active` at a time; the alert
/// controller is the only writer for its user's incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub user_id: String,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    /// Battery charge in 0..=1; `None` when the device cannot report it.
    pub battery: Option<f64>,
    pub address_snapshot: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Incident {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Immutable archive record written when an incident resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub incident_id: String,
    pub user_id: String,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub notified_contacts: u32,
}
