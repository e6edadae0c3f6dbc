//! Read-only viewer for a trusted contact watching someone's active
//! incident. A session holds the latest incident snapshot and responder
//! stage; dropping it disconnects, with no effect on the incident.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use tokio::sync::broadcast::error::RecvError;

use crate::models::{Incident, ResponderStage};
use crate::services::{TelemetryEvent, TelemetryStore};

/// Outcome of a guardian connection attempt. Absence of an active incident
/// is an expected state for the viewer, not a failure.
pub enum GuardianConnect {
    NotActive,
    Connected(GuardianSession),
}

pub struct GuardianSession {
    incident: Incident,
    latest_stage: Option<ResponderStage>,
    events: tokio::sync::broadcast::Receiver<TelemetryEvent>,
}

impl GuardianSession {
    /// Connects to the watched user's current active incident, if any.
    pub async fn connect(
        store: Arc<dyn TelemetryStore>,
        target_user_id: &str,
    ) -> Result<GuardianConnect> {
        let Some(incident) = store
            .get_active_incident(target_user_id)
            .await
            .context("failed to look up active incident")?
        else {
            return Ok(GuardianConnect::NotActive);
        };

        Self::connect_incident(store, &incident.id).await
    }

    /// Connects to a specific incident, e.g. one linked from an alert
    /// message.
    pub async fn connect_incident(
        store: Arc<dyn TelemetryStore>,
        incident_id: &str,
    ) -> Result<GuardianConnect> {
        let subscription = store
            .subscribe(incident_id)
            .await
            .context("failed to subscribe to incident telemetry")?;

        let Some(incident) = subscription.initial else {
            return Ok(GuardianConnect::NotActive);
        };

        Ok(GuardianConnect::Connected(GuardianSession {
            incident,
            latest_stage: None,
            events: subscription.events,
        }))
    }

    /// Latest incident snapshot seen by this viewer.
    pub fn snapshot(&self) -> &Incident {
        &self.incident
    }

    /// Latest responder stage reported for the incident, if any arrived
    /// during this session.
    pub fn responder_stage(&self) -> Option<ResponderStage> {
        self.latest_stage
    }

    /// Waits for the next telemetry event, applying it to the local
    /// snapshot before returning it. `None` means the publisher side is
    /// gone and no more updates will arrive.
    pub async fn next_update(&mut self) -> Option<TelemetryEvent> {
        loop {
            match self.events.recv().await {
                Ok(TelemetryEvent::Update(incident)) => {
                    self.incident = incident.clone();
                    return Some(TelemetryEvent::Update(incident));
                }
                Ok(TelemetryEvent::Responder(action)) => {
                    self.latest_stage = Some(action.action);
                    return Some(TelemetryEvent::Responder(action));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("guardian session lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
