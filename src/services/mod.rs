//! Collaborator interfaces the core consumes.
//!
//! Every external dependency (landmark lookups, the telemetry store, outbound
//! notifications, contacts, device location/battery, audio capture, evidence
//! upload) is an injected `Arc<dyn Trait>` so the alert controller and the
//! scoring engine can be exercised against fakes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;

use crate::geo::GeoPoint;
use crate::models::{
    EvidenceClip, Incident, IncidentSummary, ResponderAction, TrustedContact,
};

#[cfg(test)]
pub(crate) mod fakes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkCategory {
    Police,
    Hospital,
}

impl LandmarkCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkCategory::Police => "police",
            LandmarkCategory::Hospital => "hospital",
        }
    }
}

/// A fixed safety landmark returned by the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmark {
    pub name: String,
    pub location: GeoPoint,
    pub distance_meters: f64,
}

/// Lookup of nearby fixed safety landmarks. "No results" is an empty list,
/// never an error.
#[async_trait::async_trait]
pub trait DirectoryService: Send + Sync {
    async fn nearby(
        &self,
        point: GeoPoint,
        category: LandmarkCategory,
        radius_meters: f64,
    ) -> Result<Vec<Landmark>>;
}

/// One device position sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub point: GeoPoint,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Provider-side debounce for the location watch: a fix is delivered when the
/// device moved at least `min_distance_meters` or `min_interval` elapsed,
/// whichever triggers first.
#[derive(Debug, Clone, Copy)]
pub struct TrackingOptions {
    pub min_interval: Duration,
    pub min_distance_meters: f64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_meters: 10.0,
        }
    }
}

/// Device location access. `watch` yields fixes until the returned receiver
/// is dropped.
#[async_trait::async_trait]
pub trait LocationService: Send + Sync {
    async fn permission_granted(&self) -> bool;
    async fn current_fix(&self) -> Result<PositionFix>;
    async fn watch(&self, options: TrackingOptions) -> Result<mpsc::Receiver<PositionFix>>;
}

/// Best-effort reverse geocoding of a point to a display address.
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>>;
}

/// Device status not tied to location. Battery is 0..=1, `None` when
/// unreadable.
#[async_trait::async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn battery_level(&self) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTier {
    /// Rich multi-recipient direct message.
    DirectMessage,
    /// Single-link share fallback.
    ShareLink,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationCapabilities {
    pub direct_message: bool,
    pub share_link: bool,
}

impl NotificationCapabilities {
    /// The richest tier currently available, if any.
    pub fn preferred_tier(&self) -> Option<NotificationTier> {
        if self.direct_message {
            Some(NotificationTier::DirectMessage)
        } else if self.share_link {
            Some(NotificationTier::ShareLink)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub tier: NotificationTier,
    pub delivered_to: u32,
}

/// Outbound alert delivery. The caller probes capabilities and selects the
/// tier; the dispatcher only reports what it can do and delivers.
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn capabilities(&self) -> NotificationCapabilities;
    async fn notify(
        &self,
        recipients: &[TrustedContact],
        message: &str,
        tier: NotificationTier,
    ) -> Result<DeliveryReceipt>;
}

/// Registered trusted contacts for a user.
#[async_trait::async_trait]
pub trait ContactRegistry: Send + Sync {
    async fn list_trusted_contacts(&self, user_id: &str) -> Result<Vec<TrustedContact>>;
}

/// What a finished recording produced on local storage.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    pub local_uri: String,
    pub duration_label: String,
    pub recorded_at: DateTime<Utc>,
}

/// Audio evidence capture. `stop` returns `None` when no usable recording
/// was produced (e.g. microphone permission denied mid-flight).
#[async_trait::async_trait]
pub trait EvidenceRecorder: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<Option<RecordingArtifact>>;
}

/// Remote evidence upload. Returns the remote storage path. Tagged with the
/// archived history record id when one exists.
#[async_trait::async_trait]
pub trait EvidenceUploader: Send + Sync {
    async fn upload(&self, clip: &EvidenceClip, history_id: Option<&str>) -> Result<String>;
}

/// One message on an incident's live stream, in publish order.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Update(Incident),
    Responder(ResponderAction),
}

/// A live attachment to one incident's stream: the last known state up front,
/// then every subsequent event. Dropping the receiver unsubscribes; other
/// subscribers are unaffected.
pub struct TelemetrySubscription {
    pub initial: Option<Incident>,
    pub events: broadcast::Receiver<TelemetryEvent>,
}

/// Durable incident store with per-incident pub/sub fan-out.
///
/// Ordering: events for a single incident reach each subscriber in publish
/// order; nothing is guaranteed across incidents.
#[async_trait::async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn upsert_incident(&self, incident: &Incident) -> Result<()>;
    async fn append_responder_action(&self, action: &ResponderAction) -> Result<()>;
    async fn subscribe(&self, incident_id: &str) -> Result<TelemetrySubscription>;
    async fn get_active_incident(&self, user_id: &str) -> Result<Option<Incident>>;
    /// Archives an immutable summary, returning the history record id.
    async fn archive_incident(&self, summary: &IncidentSummary) -> Result<String>;
    async fn save_evidence_clip(&self, clip: &EvidenceClip) -> Result<()>;
    async fn mark_clip_uploaded(&self, clip_id: &str, remote_path: &str) -> Result<()>;
}
