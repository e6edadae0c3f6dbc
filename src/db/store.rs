use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{EvidenceClip, Incident, IncidentSummary, ResponderAction};
use crate::services::{TelemetryEvent, TelemetryStore, TelemetrySubscription};

use super::Database;

const FANOUT_CAPACITY: usize = 64;

/// SQLite-backed telemetry store with per-incident broadcast fan-out.
///
/// An event is broadcast only after its durable write succeeds, so every
/// subscriber observes a state the database has already accepted, in write
/// order. Channels for different incidents are independent.
pub struct SqliteTelemetryStore {
    db: Database,
    channels: Mutex<HashMap<String, broadcast::Sender<TelemetryEvent>>>,
}

impl SqliteTelemetryStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn sender_for(&self, incident_id: &str) -> broadcast::Sender<TelemetryEvent> {
        self.channels
            .lock()
            .unwrap()
            .entry(incident_id.to_string())
            .or_insert_with(|| broadcast::channel(FANOUT_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn upsert_incident(&self, incident: &Incident) -> Result<()> {
        self.db.upsert_incident(incident).await?;
        let _ = self
            .sender_for(&incident.id)
            .send(TelemetryEvent::Update(incident.clone()));
        Ok(())
    }

    async fn append_responder_action(&self, action: &ResponderAction) -> Result<()> {
        self.db.insert_responder_action(action).await?;
        let _ = self
            .sender_for(&action.incident_id)
            .send(TelemetryEvent::Responder(action.clone()));
        Ok(())
    }

    async fn subscribe(&self, incident_id: &str) -> Result<TelemetrySubscription> {
        let initial = self.db.get_incident(incident_id).await?;
        let events = self.sender_for(incident_id).subscribe();
        Ok(TelemetrySubscription { initial, events })
    }

    async fn get_active_incident(&self, user_id: &str) -> Result<Option<Incident>> {
        self.db.get_active_incident(user_id).await
    }

    async fn archive_incident(&self, summary: &IncidentSummary) -> Result<String> {
        let history_id = Uuid::new_v4().to_string();
        self.db.insert_history(&history_id, summary).await?;
        Ok(history_id)
    }

    async fn save_evidence_clip(&self, clip: &EvidenceClip) -> Result<()> {
        self.db.insert_evidence_clip(clip).await
    }

    async fn mark_clip_uploaded(&self, clip_id: &str, remote_path: &str) -> Result<()> {
        self.db.mark_clip_uploaded(clip_id, remote_path).await
    }
}
