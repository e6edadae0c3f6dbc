use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AlertError;
use crate::models::{
    EvidenceClip, Incident, IncidentStatus, IncidentSummary, ResponderStage,
};
use crate::services::{
    ContactRegistry, DeviceProbe, EvidenceRecorder, EvidenceUploader, Geocoder, LocationService,
    NotificationDispatcher, NotificationTier, TelemetryEvent, TelemetryStore, TrackingOptions,
};
use crate::settings::SettingsStore;
use crate::telemetry::{PublisherDeps, TelemetryController};

use super::{AlertEvent, AlertPhase, AlertState, Resolution};

const EVENT_CAPACITY: usize = 32;

/// Injected collaborators (spec-external services plus device seams).
#[derive(Clone)]
pub struct AlertDeps {
    pub store: Arc<dyn TelemetryStore>,
    pub contacts: Arc<dyn ContactRegistry>,
    pub location: Arc<dyn LocationService>,
    pub geocoder: Arc<dyn Geocoder>,
    pub probe: Arc<dyn DeviceProbe>,
    pub recorder: Arc<dyn EvidenceRecorder>,
    pub uploader: Arc<dyn EvidenceUploader>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub settings: Arc<SettingsStore>,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub countdown_ticks: u32,
    pub tick_interval: Duration,
    /// Hard auto-stop ceiling for evidence recording.
    pub recording_ceiling: Duration,
    pub tracking: TrackingOptions,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 10,
            tick_interval: Duration::from_secs(1),
            recording_ceiling: Duration::from_secs(60),
            tracking: TrackingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStart {
    /// Countdown started; expiry without a cancel confirms the alert.
    Confirming,
    /// Already confirming or active for this user; nothing was started.
    AlreadyInProgress,
    /// The user has no trusted contacts; one must be collected first.
    NoTrustedContacts,
    /// SOS is switched off in settings.
    SosDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Activated { incident_id: String },
    /// An incident is already active for this user; the attempt is a no-op.
    AlreadyActive { incident_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Resolved { incident_id: String },
    NotActive,
}

/// A spawned task together with the token that shuts it down.
struct TaskHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl TaskHandle {
    fn abort(self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    /// Cancels and waits for the task to finish; the caller does not return
    /// until the handle is released.
    async fn join(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Owns the lifecycle of one user's emergency incident:
/// `Idle -> Confirming -> Active -> Resolved`, with `Confirming -> Idle` on
/// cancel. All side effects after the authoritative state transition run as
/// an ordered list of independently guarded steps.
#[derive(Clone)]
pub struct AlertController {
    user_id: String,
    config: AlertConfig,
    deps: AlertDeps,
    state: Arc<Mutex<AlertState>>,
    events: broadcast::Sender<AlertEvent>,
    countdown: Arc<Mutex<Option<TaskHandle>>>,
    recording_guard: Arc<Mutex<Option<TaskHandle>>>,
    responder_watch: Arc<Mutex<Option<TaskHandle>>>,
    telemetry: Arc<Mutex<TelemetryController>>,
}

impl AlertController {
    pub fn new(user_id: impl Into<String>, deps: AlertDeps, config: AlertConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            user_id: user_id.into(),
            config,
            deps,
            state: Arc::new(Mutex::new(AlertState::new())),
            events,
            countdown: Arc::new(Mutex::new(None)),
            recording_guard: Arc::new(Mutex::new(None)),
            responder_watch: Arc::new(Mutex::new(None)),
            telemetry: Arc::new(Mutex::new(TelemetryController::new())),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> AlertPhase {
        self.state.lock().await.phase
    }

    pub async fn current_incident(&self) -> Option<Incident> {
        self.state.lock().await.incident.clone()
    }

    /// Begins the confirmation countdown. Re-entrant calls while confirming
    /// or active are no-ops; a user without trusted contacts is bounced back
    /// to collect one before any countdown starts.
    pub async fn start_confirmation(&self) -> Result<ConfirmationStart, AlertError> {
        {
            let state = self.state.lock().await;
            if !state.can_start_confirmation() {
                return Ok(ConfirmationStart::AlreadyInProgress);
            }
        }

        if !self.deps.settings.sos().enabled {
            return Ok(ConfirmationStart::SosDisabled);
        }

        let contacts = self
            .deps
            .contacts
            .list_trusted_contacts(&self.user_id)
            .await
            .context("failed to load trusted contacts")?;
        if contacts.is_empty() {
            return Ok(ConfirmationStart::NoTrustedContacts);
        }

        {
            let mut state = self.state.lock().await;
            // Re-check: the awaits above could have raced another trigger.
            if !state.can_start_confirmation() {
                return Ok(ConfirmationStart::AlreadyInProgress);
            }
            state.begin_confirmation();
        }

        self.spawn_countdown().await;
        Ok(ConfirmationStart::Confirming)
    }

    /// Cancels a running confirmation, returning the machine to `Idle`.
    /// Synchronous from the caller's view: the countdown task has joined
    /// before this returns. A no-op in any other phase.
    pub async fn cancel_confirmation(&self) -> Result<bool, AlertError> {
        {
            let state = self.state.lock().await;
            if state.phase != AlertPhase::Confirming {
                return Ok(false);
            }
        }

        let task = { self.countdown.lock().await.take() };
        if let Some(task) = task {
            task.join().await;
        }

        {
            let mut state = self.state.lock().await;
            // The countdown may have expired and confirmed while we waited.
            if state.phase != AlertPhase::Confirming {
                return Ok(false);
            }
            state.abort_confirmation();
        }

        self.emit(AlertEvent::ConfirmationCancelled);
        Ok(true)
    }

    /// Enters `Active`: creates the incident, starts evidence capture and
    /// the telemetry publisher, and notifies trusted contacts. Callable from
    /// `Confirming` (countdown expiry) or directly as a silent SOS; the
    /// entry side effects are identical either way.
    pub async fn confirm(&self) -> Result<ConfirmOutcome, AlertError> {
        {
            let state = self.state.lock().await;
            if state.phase == AlertPhase::Active {
                let incident_id = state
                    .incident
                    .as_ref()
                    .map(|i| i.id.clone())
                    .unwrap_or_default();
                return Ok(ConfirmOutcome::AlreadyActive { incident_id });
            }
        }

        if !self.deps.location.permission_granted().await {
            return Err(AlertError::PermissionDenied("location"));
        }

        // A pending countdown is redundant once confirmation is underway.
        let task = { self.countdown.lock().await.take() };
        if let Some(task) = task {
            task.join().await;
        }

        let fix = self
            .deps
            .location
            .current_fix()
            .await
            .context("failed to acquire a location fix")?;

        match self.deps.store.get_active_incident(&self.user_id).await {
            Ok(Some(existing)) => {
                // One active incident per user; adopt the existing one.
                info!(
                    "incident {} already active for {}, rejecting duplicate start",
                    existing.id, self.user_id
                );
                let incident_id = existing.id.clone();
                let mut state = self.state.lock().await;
                if state.phase != AlertPhase::Active {
                    state.activate(existing);
                }
                return Ok(ConfirmOutcome::AlreadyActive { incident_id });
            }
            Ok(None) => {}
            Err(err) => warn!("active-incident lookup failed, proceeding: {err:#}"),
        }

        let battery = self.deps.probe.battery_level().await;
        let address = match self.deps.geocoder.reverse_geocode(fix.point).await {
            Ok(address) => address,
            Err(err) => {
                warn!("reverse geocode failed: {err:#}");
                None
            }
        };

        let now = Utc::now();
        let incident = Incident {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            status: IncidentStatus::Active,
            started_at: now,
            resolved_at: None,
            latitude: fix.point.latitude,
            longitude: fix.point.longitude,
            heading: fix.heading,
            speed: fix.speed,
            battery,
            address_snapshot: address,
            last_updated: now,
        };

        {
            let mut state = self.state.lock().await;
            // Re-check: another confirmation (a silent SOS racing countdown
            // expiry, or a double trigger) may have activated while we
            // awaited the device and the store.
            if state.phase == AlertPhase::Active {
                let incident_id = state
                    .incident
                    .as_ref()
                    .map(|i| i.id.clone())
                    .unwrap_or_default();
                return Ok(ConfirmOutcome::AlreadyActive { incident_id });
            }
            state.activate(incident.clone());
        }
        self.emit(AlertEvent::Activated {
            incident_id: incident.id.clone(),
        });

        // Activation has committed. Each step below is best-effort; one
        // failure never prevents the next step from running.
        let mut failures: Vec<(&'static str, anyhow::Error)> = Vec::new();

        if let Err(err) = self.deps.store.upsert_incident(&incident).await {
            failures.push(("incident write", err));
        }
        if let Err(err) = self.start_recording().await {
            failures.push(("evidence recording", err));
        }
        if let Err(err) = self.start_publisher(incident.clone()).await {
            failures.push(("telemetry publisher", err));
        }
        if let Err(err) = self.watch_responder_actions(&incident.id).await {
            failures.push(("responder watch", err));
        }
        if let Err(err) = self.notify_contacts(&incident).await {
            failures.push(("contact notification", err));
        }
        for (step, err) in &failures {
            error!("post-activation step '{step}' failed: {err:#}");
        }

        Ok(ConfirmOutcome::Activated {
            incident_id: incident.id,
        })
    }

    /// Resolves the active incident. A no-op unless `Active`. Teardown steps
    /// run in order, each independently best-effort; after this returns no
    /// telemetry writes occur for the incident.
    pub async fn stop(&self, resolution: Resolution) -> Result<StopOutcome, AlertError> {
        {
            let state = self.state.lock().await;
            if state.phase != AlertPhase::Active {
                return Ok(StopOutcome::NotActive);
            }
        }

        let stopped_at = Utc::now();
        let mut failures: Vec<(&'static str, anyhow::Error)> = Vec::new();

        // 1. Location watch down first so nothing races the final write.
        {
            let mut telemetry = self.telemetry.lock().await;
            if let Err(err) = telemetry.stop().await {
                failures.push(("telemetry shutdown", err));
            }
        }

        let task = { self.responder_watch.lock().await.take() };
        if let Some(task) = task {
            task.join().await;
        }

        // 2. Close out any in-flight recording before the ceiling does.
        let task = { self.recording_guard.lock().await.take() };
        if let Some(task) = task {
            task.join().await;
        }
        self.finish_recording().await;
        let final_clip = { self.state.lock().await.clip.clone() };

        // 3. Authoritative resolution. Single-shot: a second stop that
        // passed the entry check during teardown finds nothing left to do.
        let resolved = { self.state.lock().await.resolve(stopped_at) };
        let Some(incident) = resolved else {
            return Ok(StopOutcome::NotActive);
        };

        // 4. Final durable write.
        if let Err(err) = self.deps.store.upsert_incident(&incident).await {
            failures.push(("final incident write", err));
        }

        // 5. Immutable history record.
        let notified_contacts = { self.state.lock().await.notified_contacts };
        let summary = IncidentSummary {
            incident_id: incident.id.clone(),
            user_id: self.user_id.clone(),
            status: IncidentStatus::Resolved,
            started_at: incident.started_at,
            resolved_at: stopped_at,
            last_latitude: incident.latitude,
            last_longitude: incident.longitude,
            notified_contacts,
        };
        let history_id = match self.deps.store.archive_incident(&summary).await {
            Ok(id) => Some(id),
            Err(err) => {
                failures.push(("incident archive", err));
                None
            }
        };

        // 6. Final evidence upload, tagged to the history record.
        if let Some(clip) = final_clip {
            self.spawn_upload(clip, history_id);
        }

        for (step, err) in &failures {
            error!("stop step '{step}' failed: {err:#}");
        }

        self.emit(AlertEvent::Stopped {
            incident_id: incident.id.clone(),
            resolution,
        });
        info!(
            "incident {} resolved ({resolution:?})",
            incident.id
        );

        Ok(StopOutcome::Resolved {
            incident_id: incident.id,
        })
    }

    async fn spawn_countdown(&self) {
        let mut guard = self.countdown.lock().await;
        if let Some(existing) = guard.take() {
            existing.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();
        let ticks = self.config.countdown_ticks;
        let tick_interval = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.tick().await; // first tick completes immediately

            let mut remaining = ticks;
            loop {
                controller.emit(AlertEvent::CountdownTick { remaining });
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => {}
                }
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }

            // Expiry: release our own handle before confirming so confirm()
            // never tears down the task it is running on.
            controller.countdown.lock().await.take();
            match controller.confirm().await {
                Ok(_) => {}
                Err(err) => {
                    warn!("auto-confirm after countdown failed: {err}");
                    controller.emit(AlertEvent::ActivationFailed {
                        reason: err.to_string(),
                    });
                }
            }
        });

        *guard = Some(TaskHandle { handle, cancel });
    }

    async fn start_recording(&self) -> Result<()> {
        self.deps
            .recorder
            .start()
            .await
            .context("failed to start evidence recording")?;
        self.state.lock().await.recording = true;

        let mut guard = self.recording_guard.lock().await;
        if let Some(existing) = guard.take() {
            existing.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();
        let ceiling = self.config.recording_ceiling;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = time::sleep(ceiling) => {}
            }
            info!("evidence recording hit the {}s ceiling", ceiling.as_secs());
            if let Some(clip) = controller.finish_recording().await {
                controller.spawn_upload(clip, None);
            }
        });

        *guard = Some(TaskHandle { handle, cancel });
        Ok(())
    }

    /// Stops the recorder and persists the clip locally. Exactly one caller
    /// wins the race between the ceiling task and `stop`; everyone else
    /// sees `None`.
    async fn finish_recording(&self) -> Option<EvidenceClip> {
        let incident_id = {
            let mut state = self.state.lock().await;
            if !state.recording {
                return None;
            }
            state.recording = false;
            state.incident.as_ref().map(|i| i.id.clone())
        };

        let artifact = match self.deps.recorder.stop().await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return None,
            Err(err) => {
                warn!("failed to stop evidence recording: {err:#}");
                return None;
            }
        };

        let clip = EvidenceClip {
            id: Uuid::new_v4().to_string(),
            incident_id,
            local_uri: artifact.local_uri,
            remote_storage_path: None,
            duration_label: artifact.duration_label,
            recorded_at: artifact.recorded_at,
        };

        // Upload failure later must not undo this local record.
        if let Err(err) = self.deps.store.save_evidence_clip(&clip).await {
            warn!("failed to persist evidence clip {}: {err:#}", clip.id);
        }

        self.state.lock().await.clip = Some(clip.clone());
        Some(clip)
    }

    fn spawn_upload(&self, clip: EvidenceClip, history_id: Option<String>) {
        let uploader = self.deps.uploader.clone();
        let store = self.deps.store.clone();
        tokio::spawn(async move {
            match uploader.upload(&clip, history_id.as_deref()).await {
                Ok(path) => {
                    if let Err(err) = store.mark_clip_uploaded(&clip.id, &path).await {
                        warn!("failed to record upload path for clip {}: {err:#}", clip.id);
                    }
                    info!("evidence clip {} uploaded to {path}", clip.id);
                }
                Err(err) => {
                    warn!("evidence upload failed for clip {} (kept locally): {err:#}", clip.id)
                }
            }
        });
    }

    async fn start_publisher(&self, incident: Incident) -> Result<()> {
        let deps = PublisherDeps {
            store: self.deps.store.clone(),
            geocoder: self.deps.geocoder.clone(),
            probe: self.deps.probe.clone(),
        };
        self.telemetry
            .lock()
            .await
            .start(
                incident,
                self.deps.location.clone(),
                self.config.tracking,
                deps,
                self.events.clone(),
            )
            .await
    }

    /// Reacts to externally reported responder actions; a `RESOLVED` action
    /// drives the same stop path as a user stop, surfaced distinctly.
    async fn watch_responder_actions(&self, incident_id: &str) -> Result<()> {
        let mut subscription = self
            .deps
            .store
            .subscribe(incident_id)
            .await
            .context("failed to subscribe to responder actions")?;

        let mut guard = self.responder_watch.lock().await;
        if let Some(existing) = guard.take() {
            existing.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();
        let incident_id = incident_id.to_string();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    event = subscription.events.recv() => match event {
                        Ok(TelemetryEvent::Responder(action))
                            if action.action == ResponderStage::Resolved =>
                        {
                            info!("responder resolved incident {incident_id}");
                            // Clear our own slot so stop() never joins the
                            // task it is running on.
                            controller.responder_watch.lock().await.take();
                            if let Err(err) =
                                controller.stop(Resolution::ResponderResolved).await
                            {
                                error!("responder-driven stop failed: {err}");
                            }
                            return;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("responder watch lagged, skipped {skipped} events");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });

        *guard = Some(TaskHandle { handle, cancel });
        Ok(())
    }

    async fn notify_contacts(&self, incident: &Incident) -> Result<()> {
        let contacts = self
            .deps
            .contacts
            .list_trusted_contacts(&self.user_id)
            .await
            .context("failed to load trusted contacts")?;
        if contacts.is_empty() {
            info!("no trusted contacts registered, skipping notification");
            return Ok(());
        }

        let message = format!(
            "EMERGENCY! I need help. Track my live location: https://maps.google.com/?q={},{}",
            incident.latitude, incident.longitude
        );

        let caps = self.deps.dispatcher.capabilities().await;
        let Some(tier) = caps.preferred_tier() else {
            bail!("no notification channel available");
        };

        let receipt = match self.deps.dispatcher.notify(&contacts, &message, tier).await {
            Ok(receipt) => receipt,
            Err(err) if tier == NotificationTier::DirectMessage && caps.share_link => {
                warn!("direct message delivery failed, falling back to share link: {err:#}");
                self.deps
                    .dispatcher
                    .notify(&contacts, &message, NotificationTier::ShareLink)
                    .await
                    .context("share-link fallback delivery failed")?
            }
            Err(err) => return Err(err.context("alert notification failed")),
        };

        info!(
            "alert delivered to {} contact(s) via {:?}",
            receipt.delivered_to, receipt.tier
        );
        self.state.lock().await.notified_contacts = receipt.delivered_to;
        Ok(())
    }

    fn emit(&self, event: AlertEvent) {
        let _ = self.events.send(event);
    }
}
