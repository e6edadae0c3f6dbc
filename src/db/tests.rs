use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use super::{Database, SqliteTelemetryStore};
use crate::models::{
    EvidenceClip, Incident, IncidentStatus, IncidentSummary, ResponderAction, ResponderStage,
};
use crate::services::{TelemetryEvent, TelemetryStore};

fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("guardian.sqlite3")).unwrap();
    (dir, db)
}

fn incident(id: &str, user: &str) -> Incident {
    let now = Utc::now();
    Incident {
        id: id.into(),
        user_id: user.into(),
        status: IncidentStatus::Active,
        started_at: now,
        resolved_at: None,
        latitude: 43.6532,
        longitude: -79.3832,
        heading: Some(12.5),
        speed: Some(1.4),
        battery: Some(0.73),
        address_snapshot: Some("100 Queen St W, Toronto".into()),
        last_updated: now,
    }
}

#[tokio::test]
async fn reopening_an_existing_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guardian.sqlite3");

    {
        let db = Database::new(path.clone()).unwrap();
        db.upsert_incident(&incident("inc-1", "user-1")).await.unwrap();
    }

    let db = Database::new(path).unwrap();
    let found = db.get_incident("inc-1").await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn incident_round_trips_all_fields() {
    let (_dir, db) = open_db();
    let original = incident("inc-1", "user-1");
    db.upsert_incident(&original).await.unwrap();

    let loaded = db.get_incident("inc-1").await.unwrap().unwrap();
    assert_eq!(loaded.user_id, "user-1");
    assert_eq!(loaded.status, IncidentStatus::Active);
    assert_eq!(loaded.latitude, original.latitude);
    assert_eq!(loaded.heading, Some(12.5));
    assert_eq!(loaded.battery, Some(0.73));
    assert_eq!(loaded.address_snapshot.as_deref(), Some("100 Queen St W, Toronto"));
}

#[tokio::test]
async fn upsert_overwrites_mutable_fields() {
    let (_dir, db) = open_db();
    let mut inc = incident("inc-1", "user-1");
    db.upsert_incident(&inc).await.unwrap();

    inc.latitude = 43.70;
    inc.battery = Some(0.51);
    inc.status = IncidentStatus::Resolved;
    inc.resolved_at = Some(Utc::now());
    db.upsert_incident(&inc).await.unwrap();

    let loaded = db.get_incident("inc-1").await.unwrap().unwrap();
    assert_eq!(loaded.latitude, 43.70);
    assert_eq!(loaded.battery, Some(0.51));
    assert_eq!(loaded.status, IncidentStatus::Resolved);
    assert!(loaded.resolved_at.is_some());
}

#[tokio::test]
async fn active_lookup_picks_latest_active_and_ignores_resolved() {
    let (_dir, db) = open_db();

    let mut older = incident("inc-old", "user-1");
    older.started_at = Utc::now() - Duration::hours(2);
    db.upsert_incident(&older).await.unwrap();

    let mut resolved = incident("inc-done", "user-1");
    resolved.status = IncidentStatus::Resolved;
    resolved.started_at = Utc::now() - Duration::minutes(5);
    db.upsert_incident(&resolved).await.unwrap();

    let newer = incident("inc-new", "user-1");
    db.upsert_incident(&newer).await.unwrap();

    let active = db.get_active_incident("user-1").await.unwrap().unwrap();
    assert_eq!(active.id, "inc-new");

    assert!(db.get_active_incident("user-2").await.unwrap().is_none());
}

#[tokio::test]
async fn responder_actions_come_back_in_order() {
    let (_dir, db) = open_db();
    db.upsert_incident(&incident("inc-1", "user-1")).await.unwrap();

    let base = Utc::now();
    for (i, stage) in [
        ResponderStage::Dispatched,
        ResponderStage::EnRoute,
        ResponderStage::OnScene,
    ]
    .into_iter()
    .enumerate()
    {
        db.insert_responder_action(&ResponderAction {
            id: format!("act-{i}"),
            incident_id: "inc-1".into(),
            action: stage,
            created_at: base + Duration::seconds(i as i64),
        })
        .await
        .unwrap();
    }

    let actions = db.get_responder_actions("inc-1").await.unwrap();
    assert_eq!(actions.len(), 3);
    assert_eq!(actions[0].action, ResponderStage::Dispatched);
    assert_eq!(actions[2].action, ResponderStage::OnScene);
}

#[tokio::test]
async fn evidence_clip_upload_path_is_recorded() {
    let (_dir, db) = open_db();
    db.upsert_incident(&incident("inc-1", "user-1")).await.unwrap();

    let clip = EvidenceClip {
        id: "clip-1".into(),
        incident_id: Some("inc-1".into()),
        local_uri: "file:///tmp/clip.m4a".into(),
        remote_storage_path: None,
        duration_label: "0:42".into(),
        recorded_at: Utc::now(),
    };
    db.insert_evidence_clip(&clip).await.unwrap();
    db.mark_clip_uploaded("clip-1", "evidence/clip-1.m4a").await.unwrap();

    let clips = db.get_evidence_clips("inc-1").await.unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].remote_storage_path.as_deref(), Some("evidence/clip-1.m4a"));
}

#[tokio::test]
async fn history_lists_newest_first() {
    let (_dir, db) = open_db();

    let base = Utc::now();
    for i in 0..3 {
        db.insert_history(
            &format!("hist-{i}"),
            &IncidentSummary {
                incident_id: format!("inc-{i}"),
                user_id: "user-1".into(),
                status: IncidentStatus::Resolved,
                started_at: base - Duration::hours(3 - i as i64),
                resolved_at: base - Duration::hours(3 - i as i64) + Duration::minutes(10),
                last_latitude: 43.65,
                last_longitude: -79.38,
                notified_contacts: 2,
            },
        )
        .await
        .unwrap();
    }

    let history = db.list_history("user-1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].incident_id, "inc-2");
    assert_eq!(history[2].incident_id, "inc-0");
}

#[tokio::test]
async fn stale_active_incidents_are_recovered() {
    let (_dir, db) = open_db();
    db.upsert_incident(&incident("inc-1", "user-1")).await.unwrap();
    db.upsert_incident(&incident("inc-2", "user-2")).await.unwrap();

    let recovered = db.recover_stale_incidents(Utc::now()).await.unwrap();
    assert_eq!(recovered.len(), 2);
    assert!(db.get_active_incident("user-1").await.unwrap().is_none());

    let closed = db.get_incident("inc-1").await.unwrap().unwrap();
    assert_eq!(closed.status, IncidentStatus::Resolved);
    assert!(closed.resolved_at.is_some());
}

#[tokio::test]
async fn store_broadcasts_after_durable_write() {
    let (_dir, db) = open_db();
    let store = Arc::new(SqliteTelemetryStore::new(db));

    let mut inc = incident("inc-1", "user-1");
    store.upsert_incident(&inc).await.unwrap();

    let mut sub = store.subscribe("inc-1").await.unwrap();
    assert_eq!(sub.initial.as_ref().map(|i| i.id.as_str()), Some("inc-1"));

    inc.latitude = 43.70;
    store.upsert_incident(&inc).await.unwrap();

    match sub.events.recv().await.unwrap() {
        TelemetryEvent::Update(update) => assert_eq!(update.latitude, 43.70),
        other => panic!("unexpected event {other:?}"),
    }

    // The write is already durable when the event arrives.
    let loaded = store.database().get_incident("inc-1").await.unwrap().unwrap();
    assert_eq!(loaded.latitude, 43.70);
}

#[tokio::test]
async fn channels_for_different_incidents_are_independent() {
    let (_dir, db) = open_db();
    let store = Arc::new(SqliteTelemetryStore::new(db));

    store.upsert_incident(&incident("inc-a", "user-a")).await.unwrap();
    store.upsert_incident(&incident("inc-b", "user-b")).await.unwrap();

    let mut sub_a = store.subscribe("inc-a").await.unwrap();

    store
        .append_responder_action(&ResponderAction {
            id: "act-1".into(),
            incident_id: "inc-b".into(),
            action: ResponderStage::Dispatched,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut inc_a = incident("inc-a", "user-a");
    inc_a.latitude = 44.0;
    store.upsert_incident(&inc_a).await.unwrap();

    // The inc-b action never shows up on inc-a's channel.
    match sub_a.events.recv().await.unwrap() {
        TelemetryEvent::Update(update) => assert_eq!(update.id, "inc-a"),
        other => panic!("unexpected event {other:?}"),
    }
}
