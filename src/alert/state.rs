use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EvidenceClip, Incident, IncidentStatus};

/// Lifecycle phases of one user's alert machine. No transition skips a
/// phase; `Resolved` is terminal for the incident it closed, and a fresh
/// confirmation cycle starts from it as if from `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertPhase {
    Idle,
    Confirming,
    Active,
    Resolved,
}

impl Default for AlertPhase {
    fn default() -> Self {
        AlertPhase::Idle
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub phase: AlertPhase,
    pub incident: Option<Incident>,
    pub notified_contacts: u32,
    /// True while an evidence recording is in flight; cleared by whoever
    /// stops it first (the 60 s ceiling or `stop`).
    pub recording: bool,
    pub clip: Option<EvidenceClip>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    /// May a confirmation cycle begin from this phase?
    pub fn can_start_confirmation(&self) -> bool {
        matches!(self.phase, AlertPhase::Idle | AlertPhase::Resolved)
    }

    pub fn begin_confirmation(&mut self) {
        self.phase = AlertPhase::Confirming;
    }

    pub fn abort_confirmation(&mut self) {
        self.phase = AlertPhase::Idle;
    }

    pub fn activate(&mut self, incident: Incident) {
        self.phase = AlertPhase::Active;
        self.incident = Some(incident);
        self.notified_contacts = 0;
        self.recording = false;
        self.clip = None;
    }

    /// Marks the current incident resolved and returns a snapshot of it.
    /// Single-shot: only fires from `Active`, so of two racing stops
    /// exactly one observes the incident to close out.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> Option<Incident> {
        if self.phase != AlertPhase::Active {
            return None;
        }
        self.phase = AlertPhase::Resolved;
        let incident = self.incident.as_mut()?;
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(at);
        incident.last_updated = at;
        Some(incident.clone())
    }
}
