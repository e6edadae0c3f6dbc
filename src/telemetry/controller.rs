use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertEvent;
use crate::models::Incident;
use crate::services::{LocationService, TrackingOptions};

use super::publisher::{publisher_loop, PublisherDeps};

/// Owns the single location-watch task for one user's active incident.
/// `start` hands the task its cancellation token; `stop` does not return
/// until the task has joined, so nothing can emit after logical teardown.
pub struct TelemetryController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl TelemetryController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub async fn start(
        &mut self,
        incident: Incident,
        location: Arc<dyn LocationService>,
        options: TrackingOptions,
        deps: PublisherDeps,
        events: broadcast::Sender<AlertEvent>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("telemetry publisher already active");
        }

        let fixes = location
            .watch(options)
            .await
            .context("failed to start location watch")?;

        info!("starting telemetry publisher for incident {}", incident.id);

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let handle = tokio::spawn(publisher_loop(incident, fixes, deps, events, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("telemetry publisher task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for TelemetryController {
    fn default() -> Self {
        Self::new()
    }
}
