use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::alert::AlertEvent;
use crate::models::Incident;
use crate::services::{DeviceProbe, Geocoder, PositionFix, TelemetryStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Telemetry store writes are abandoned, not retried, past this bound.
const WRITE_TIMEOUT_SECS: u64 = 10;
const GEOCODE_TIMEOUT_SECS: u64 = 3;

#[derive(Clone)]
pub struct PublisherDeps {
    pub store: Arc<dyn TelemetryStore>,
    pub geocoder: Arc<dyn Geocoder>,
    pub probe: Arc<dyn DeviceProbe>,
}

/// Pushes one incident's position stream to the telemetry store until
/// cancelled.
///
/// A slow or failing store write never blocks the next fix, and a failed
/// write only logs. In-flight writes are tracked and drained before the
/// loop exits, so once the controller's `stop` has joined this task no
/// telemetry write can land afterwards. If the device stops delivering
/// fixes the incident stays active and the degradation is surfaced on the
/// alert event bus.
pub async fn publisher_loop(
    mut incident: Incident,
    mut fixes: mpsc::Receiver<PositionFix>,
    deps: PublisherDeps,
    events: broadcast::Sender<AlertEvent>,
    cancel: CancellationToken,
) {
    let mut writes: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log_info!("telemetry publisher shutting down for incident {}", incident.id);
                break;
            }
            Some(_) = writes.join_next(), if !writes.is_empty() => {}
            fix = fixes.recv() => {
                let Some(fix) = fix else {
                    log_warn!(
                        "location watch ended unexpectedly for incident {}; tracking degraded",
                        incident.id
                    );
                    let _ = events.send(AlertEvent::TrackingDegraded);
                    break;
                };

                incident.latitude = fix.point.latitude;
                incident.longitude = fix.point.longitude;
                incident.heading = fix.heading;
                incident.speed = fix.speed;
                incident.battery = deps.probe.battery_level().await;
                incident.last_updated = Utc::now();

                publish_update(incident.clone(), fix, deps.clone(), &mut writes);
            }
        }
    }

    // Settle whatever is still in flight; each write carries its own
    // timeout, so this is bounded.
    while writes.join_next().await.is_some() {}
}

/// Spawns one durable write for a fresh fix; the watch loop never waits on
/// it, but tracks it for shutdown.
fn publish_update(
    mut update: Incident,
    fix: PositionFix,
    deps: PublisherDeps,
    writes: &mut JoinSet<()>,
) {
    writes.spawn(async move {
        // Reverse geocoding rides along best-effort with its own bound.
        match timeout(
            Duration::from_secs(GEOCODE_TIMEOUT_SECS),
            deps.geocoder.reverse_geocode(fix.point),
        )
        .await
        {
            Ok(Ok(address)) => update.address_snapshot = address,
            Ok(Err(err)) => log_warn!("reverse geocode failed: {err:#}"),
            Err(_) => log_warn!("reverse geocode timed out (> {GEOCODE_TIMEOUT_SECS}s)"),
        }

        let incident_id = update.id.clone();
        match timeout(
            Duration::from_secs(WRITE_TIMEOUT_SECS),
            deps.store.upsert_incident(&update),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log_error!("telemetry write failed for incident {incident_id}: {err:#}")
            }
            Err(_) => log_warn!(
                "telemetry write abandoned after {WRITE_TIMEOUT_SECS}s for incident {incident_id}"
            ),
        }
    });
}
