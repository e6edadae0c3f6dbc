//! In-memory collaborator fakes shared across the crate's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::geo::{self, GeoPoint};
use crate::models::{
    EvidenceClip, Incident, IncidentStatus, IncidentSummary, ResponderAction, TrustedContact,
};
use crate::services::{
    ContactRegistry, DeliveryReceipt, DeviceProbe, DirectoryService, EvidenceRecorder,
    EvidenceUploader, Geocoder, Landmark, LandmarkCategory, LocationService,
    NotificationCapabilities, NotificationDispatcher, NotificationTier, PositionFix,
    RecordingArtifact, TelemetryEvent, TelemetryStore, TelemetrySubscription, TrackingOptions,
};

const FANOUT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Directory

#[derive(Default)]
pub struct FakeDirectory {
    entries: Vec<(LandmarkCategory, Landmark)>,
    failing: Option<LandmarkCategory>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_police(self, name: &str, location: GeoPoint, distance_meters: f64) -> Self {
        self.with_landmark(LandmarkCategory::Police, name, location, distance_meters)
    }

    pub fn with_hospital(self, name: &str, location: GeoPoint, distance_meters: f64) -> Self {
        self.with_landmark(LandmarkCategory::Hospital, name, location, distance_meters)
    }

    pub fn with_landmark(
        mut self,
        category: LandmarkCategory,
        name: &str,
        location: GeoPoint,
        distance_meters: f64,
    ) -> Self {
        self.entries.push((
            category,
            Landmark {
                name: name.to_string(),
                location,
                distance_meters,
            },
        ));
        self
    }

    pub fn failing_category(mut self, category: LandmarkCategory) -> Self {
        self.failing = Some(category);
        self
    }
}

#[async_trait::async_trait]
impl DirectoryService for FakeDirectory {
    async fn nearby(
        &self,
        point: GeoPoint,
        category: LandmarkCategory,
        radius_meters: f64,
    ) -> Result<Vec<Landmark>> {
        if self.failing == Some(category) {
            return Err(anyhow!("directory unavailable"));
        }
        Ok(self
            .entries
            .iter()
            .filter(|(cat, landmark)| {
                *cat == category
                    && geo::distance_meters(point, landmark.location) <= radius_meters
            })
            .map(|(_, landmark)| landmark.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Contacts

#[derive(Default)]
pub struct FakeContactRegistry {
    contacts: Vec<TrustedContact>,
}

impl FakeContactRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_contacts(count: usize) -> Self {
        let contacts = (0..count)
            .map(|i| TrustedContact {
                id: format!("contact-{i}"),
                user_id: "user-1".to_string(),
                name: format!("Contact {i}"),
                phone: format!("+9198000000{i:02}"),
                relation: None,
                is_primary: i == 0,
            })
            .collect();
        Self { contacts }
    }
}

#[async_trait::async_trait]
impl ContactRegistry for FakeContactRegistry {
    async fn list_trusted_contacts(&self, user_id: &str) -> Result<Vec<TrustedContact>> {
        Ok(self
            .contacts
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Location / device

pub struct FakeLocationService {
    permission: AtomicBool,
    fix: Mutex<PositionFix>,
    watchers: Mutex<Vec<mpsc::Sender<PositionFix>>>,
}

impl FakeLocationService {
    pub fn granted_at(point: GeoPoint) -> Self {
        Self {
            permission: AtomicBool::new(true),
            fix: Mutex::new(PositionFix {
                point,
                heading: Some(90.0),
                speed: Some(1.4),
                timestamp: Utc::now(),
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn denied() -> Self {
        let me = Self::granted_at(GeoPoint::new(0.0, 0.0));
        me.permission.store(false, Ordering::SeqCst);
        me
    }

    /// Delivers a fix to every live watcher, as the device would.
    pub async fn push_fix(&self, fix: PositionFix) {
        *self.fix.lock().unwrap() = fix.clone();
        let watchers = self.watchers.lock().unwrap().clone();
        for tx in watchers {
            let _ = tx.send(fix.clone()).await;
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

#[async_trait::async_trait]
impl LocationService for FakeLocationService {
    async fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    async fn current_fix(&self) -> Result<PositionFix> {
        if !self.permission.load(Ordering::SeqCst) {
            return Err(anyhow!("location permission denied"));
        }
        Ok(self.fix.lock().unwrap().clone())
    }

    async fn watch(&self, _options: TrackingOptions) -> Result<mpsc::Receiver<PositionFix>> {
        let (tx, rx) = mpsc::channel(32);
        self.watchers.lock().unwrap().push(tx);
        Ok(rx)
    }
}

pub struct FakeGeocoder;

#[async_trait::async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>> {
        Ok(Some(format!(
            "near {:.3},{:.3}",
            point.latitude, point.longitude
        )))
    }
}

pub struct FakeDeviceProbe {
    pub battery: Option<f64>,
}

#[async_trait::async_trait]
impl DeviceProbe for FakeDeviceProbe {
    async fn battery_level(&self) -> Option<f64> {
        self.battery
    }
}

// ---------------------------------------------------------------------------
// Evidence

#[derive(Default)]
pub struct FakeRecorder {
    pub started: AtomicU32,
    pub stopped: AtomicU32,
    produce_artifact: AtomicBool,
}

impl FakeRecorder {
    pub fn new() -> Self {
        let me = Self::default();
        me.produce_artifact.store(true, Ordering::SeqCst);
        me
    }

    pub fn without_artifact() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EvidenceRecorder for FakeRecorder {
    async fn start(&self) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<Option<RecordingArtifact>> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if self.produce_artifact.load(Ordering::SeqCst) {
            Ok(Some(RecordingArtifact {
                local_uri: "file:///tmp/clip.m4a".to_string(),
                duration_label: "0:42".to_string(),
                recorded_at: Utc::now(),
            }))
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<(String, Option<String>)>>,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl EvidenceUploader for FakeUploader {
    async fn upload(&self, clip: &EvidenceClip, history_id: Option<&str>) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("storage unreachable"));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((clip.id.clone(), history_id.map(str::to_string)));
        Ok(format!("evidence/{}.m4a", clip.id))
    }
}

// ---------------------------------------------------------------------------
// Notifications

pub struct FakeDispatcher {
    capabilities: NotificationCapabilities,
    fail_direct: AtomicBool,
    pub deliveries: Mutex<Vec<(NotificationTier, usize)>>,
}

impl FakeDispatcher {
    pub fn full() -> Self {
        Self {
            capabilities: NotificationCapabilities {
                direct_message: true,
                share_link: true,
            },
            fail_direct: AtomicBool::new(false),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn share_link_only() -> Self {
        Self {
            capabilities: NotificationCapabilities {
                direct_message: false,
                share_link: true,
            },
            fail_direct: AtomicBool::new(false),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn direct_tier_broken() -> Self {
        let me = Self::full();
        me.fail_direct.store(true, Ordering::SeqCst);
        me
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for FakeDispatcher {
    async fn capabilities(&self) -> NotificationCapabilities {
        self.capabilities
    }

    async fn notify(
        &self,
        recipients: &[TrustedContact],
        _message: &str,
        tier: NotificationTier,
    ) -> Result<DeliveryReceipt> {
        if tier == NotificationTier::DirectMessage && self.fail_direct.load(Ordering::SeqCst) {
            return Err(anyhow!("direct channel unavailable"));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((tier, recipients.len()));
        Ok(DeliveryReceipt {
            tier,
            delivered_to: recipients.len() as u32,
        })
    }
}

// ---------------------------------------------------------------------------
// Telemetry store

#[derive(Default)]
struct MemoryState {
    incidents: HashMap<String, Incident>,
    actions: Vec<ResponderAction>,
    history: Vec<IncidentSummary>,
    clips: Vec<EvidenceClip>,
    write_log: Vec<String>,
}

/// In-memory reference store with per-incident broadcast fan-out.
#[derive(Default)]
pub struct MemoryTelemetryStore {
    state: Mutex<MemoryState>,
    channels: Mutex<HashMap<String, broadcast::Sender<TelemetryEvent>>>,
    pub fail_writes: AtomicBool,
    write_delay: Mutex<Option<std::time::Duration>>,
    lookup_delay: Mutex<Option<std::time::Duration>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upsert take this long, to surface in-flight write races.
    pub fn delay_writes(&self, delay: std::time::Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    /// Makes active-incident lookups take this long, to widen the window
    /// between an operation's checks and its commit.
    pub fn delay_lookups(&self, delay: std::time::Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    fn channel(&self, incident_id: &str) -> broadcast::Sender<TelemetryEvent> {
        self.channels
            .lock()
            .unwrap()
            .entry(incident_id.to_string())
            .or_insert_with(|| broadcast::channel(FANOUT_CAPACITY).0)
            .clone()
    }

    pub fn incident(&self, incident_id: &str) -> Option<Incident> {
        self.state
            .lock()
            .unwrap()
            .incidents
            .get(incident_id)
            .cloned()
    }

    /// Number of upserts recorded for one incident id.
    pub fn write_count(&self, incident_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .write_log
            .iter()
            .filter(|id| id.as_str() == incident_id)
            .count()
    }

    pub fn history(&self) -> Vec<IncidentSummary> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn clips(&self) -> Vec<EvidenceClip> {
        self.state.lock().unwrap().clips.clone()
    }
}

#[async_trait::async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn upsert_incident(&self, incident: &Incident) -> Result<()> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store write failed"));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.write_log.push(incident.id.clone());
            state
                .incidents
                .insert(incident.id.clone(), incident.clone());
        }
        let _ = self
            .channel(&incident.id)
            .send(TelemetryEvent::Update(incident.clone()));
        Ok(())
    }

    async fn append_responder_action(&self, action: &ResponderAction) -> Result<()> {
        self.state.lock().unwrap().actions.push(action.clone());
        let _ = self
            .channel(&action.incident_id)
            .send(TelemetryEvent::Responder(action.clone()));
        Ok(())
    }

    async fn subscribe(&self, incident_id: &str) -> Result<TelemetrySubscription> {
        let events = self.channel(incident_id).subscribe();
        let initial = self.incident(incident_id);
        Ok(TelemetrySubscription { initial, events })
    }

    async fn get_active_incident(&self, user_id: &str) -> Result<Option<Incident>> {
        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .values()
            .filter(|i| i.user_id == user_id && i.status == IncidentStatus::Active)
            .max_by_key(|i| i.started_at)
            .cloned())
    }

    async fn archive_incident(&self, summary: &IncidentSummary) -> Result<String> {
        self.state.lock().unwrap().history.push(summary.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn save_evidence_clip(&self, clip: &EvidenceClip) -> Result<()> {
        self.state.lock().unwrap().clips.push(clip.clone());
        Ok(())
    }

    async fn mark_clip_uploaded(&self, clip_id: &str, remote_path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(clip) = state.clips.iter_mut().find(|c| c.id == clip_id) {
            clip.remote_storage_path = Some(remote_path.to_string());
        }
        Ok(())
    }
}
