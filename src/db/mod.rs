use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;
pub mod store;

#[cfg(test)]
mod tests;

use crate::models::{
    EvidenceClip, Incident, IncidentStatus, IncidentSummary, ResponderAction, ResponderStage,
};
use migrations::run_migrations;

pub use store::SqliteTelemetryStore;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn status_from_str(value: &str) -> Result<IncidentStatus> {
    match value {
        "ACTIVE" => Ok(IncidentStatus::Active),
        "RESOLVED" => Ok(IncidentStatus::Resolved),
        _ => Err(anyhow!("unknown incident status '{value}'")),
    }
}

fn stage_from_str(value: &str) -> Result<ResponderStage> {
    match value {
        "DISPATCHED" => Ok(ResponderStage::Dispatched),
        "EN_ROUTE" => Ok(ResponderStage::EnRoute),
        "ON_SCENE" => Ok(ResponderStage::OnScene),
        "RESOLVED" => Ok(ResponderStage::Resolved),
        _ => Err(anyhow!("unknown responder stage '{value}'")),
    }
}

fn incident_from_row(row: &Row<'_>) -> Result<Incident> {
    Ok(Incident {
        id: row.get::<_, String>(0)?,
        user_id: row.get::<_, String>(1)?,
        status: status_from_str(&row.get::<_, String>(2)?)?,
        started_at: parse_datetime(&row.get::<_, String>(3)?)?,
        resolved_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s))
            .transpose()?,
        latitude: row.get::<_, f64>(5)?,
        longitude: row.get::<_, f64>(6)?,
        heading: row.get::<_, Option<f64>>(7)?,
        speed: row.get::<_, Option<f64>>(8)?,
        battery: row.get::<_, Option<f64>>(9)?,
        address_snapshot: row.get::<_, Option<String>>(10)?,
        last_updated: parse_datetime(&row.get::<_, String>(11)?)?,
    })
}

const INCIDENT_COLUMNS: &str = "id, user_id, status, started_at, resolved_at, latitude, \
     longitude, heading, speed, battery, address_snapshot, last_updated";

/// Handle to the local incident database. All SQLite access happens on one
/// dedicated worker thread; async callers send closures over a channel and
/// await the reply.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("guardian-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Inserts the incident or overwrites its mutable telemetry fields.
    pub async fn upsert_incident(&self, incident: &Incident) -> Result<()> {
        let record = incident.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO incidents (id, user_id, status, started_at, resolved_at, latitude, \
                     longitude, heading, speed, battery, address_snapshot, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     resolved_at = excluded.resolved_at,
                     latitude = excluded.latitude,
                     longitude = excluded.longitude,
                     heading = excluded.heading,
                     speed = excluded.speed,
                     battery = excluded.battery,
                     address_snapshot = excluded.address_snapshot,
                     last_updated = excluded.last_updated",
                params![
                    record.id,
                    record.user_id,
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.resolved_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.latitude,
                    record.longitude,
                    record.heading,
                    record.speed,
                    record.battery,
                    record.address_snapshot,
                    record.last_updated.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert incident")?;
            Ok(())
        })
        .await
    }

    pub async fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        let incident_id = incident_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![incident_id])?;
            if let Some(row) = rows.next()? {
                Ok(Some(incident_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// The most recently started ACTIVE incident for a user, if any.
    pub async fn get_active_incident(&self, user_id: &str) -> Result<Option<Incident>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents
                 WHERE user_id = ?1 AND status = 'ACTIVE'
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![user_id])?;
            if let Some(row) = rows.next()? {
                Ok(Some(incident_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// All incidents still marked ACTIVE; used for crash recovery at startup.
    pub async fn get_unresolved_incidents(&self) -> Result<Vec<Incident>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents
                 WHERE status = 'ACTIVE'
                 ORDER BY started_at DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut incidents = Vec::new();
            while let Some(row) = rows.next()? {
                incidents.push(incident_from_row(row)?);
            }
            Ok(incidents)
        })
        .await
    }

    pub async fn mark_incident_resolved(
        &self,
        incident_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        let incident_id = incident_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE incidents
                 SET status = 'RESOLVED',
                     resolved_at = ?1,
                     last_updated = ?1
                 WHERE id = ?2",
                params![resolved_at.to_rfc3339(), incident_id],
            )
            .with_context(|| "failed to mark incident resolved")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_responder_action(&self, action: &ResponderAction) -> Result<()> {
        let record = action.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO responder_actions (id, incident_id, action, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id,
                    record.incident_id,
                    record.action.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert responder action")?;
            Ok(())
        })
        .await
    }

    pub async fn get_responder_actions(&self, incident_id: &str) -> Result<Vec<ResponderAction>> {
        let incident_id = incident_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, incident_id, action, created_at
                 FROM responder_actions
                 WHERE incident_id = ?1
                 ORDER BY created_at ASC",
            )?;

            let mut rows = stmt.query(params![incident_id])?;
            let mut actions = Vec::new();
            while let Some(row) = rows.next()? {
                actions.push(ResponderAction {
                    id: row.get::<_, String>(0)?,
                    incident_id: row.get::<_, String>(1)?,
                    action: stage_from_str(&row.get::<_, String>(2)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?)?,
                });
            }
            Ok(actions)
        })
        .await
    }

    pub async fn insert_evidence_clip(&self, clip: &EvidenceClip) -> Result<()> {
        let record = clip.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO evidence_clips (id, incident_id, local_uri, remote_storage_path, \
                     duration_label, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.incident_id,
                    record.local_uri,
                    record.remote_storage_path,
                    record.duration_label,
                    record.recorded_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert evidence clip")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_clip_uploaded(&self, clip_id: &str, remote_path: &str) -> Result<()> {
        let clip_id = clip_id.to_string();
        let remote_path = remote_path.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE evidence_clips SET remote_storage_path = ?1 WHERE id = ?2",
                params![remote_path, clip_id],
            )
            .with_context(|| "failed to record clip upload path")?;
            Ok(())
        })
        .await
    }

    pub async fn get_evidence_clips(&self, incident_id: &str) -> Result<Vec<EvidenceClip>> {
        let incident_id = incident_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, incident_id, local_uri, remote_storage_path, duration_label, recorded_at
                 FROM evidence_clips
                 WHERE incident_id = ?1
                 ORDER BY recorded_at ASC",
            )?;

            let mut rows = stmt.query(params![incident_id])?;
            let mut clips = Vec::new();
            while let Some(row) = rows.next()? {
                clips.push(EvidenceClip {
                    id: row.get::<_, String>(0)?,
                    incident_id: row.get::<_, Option<String>>(1)?,
                    local_uri: row.get::<_, String>(2)?,
                    remote_storage_path: row.get::<_, Option<String>>(3)?,
                    duration_label: row.get::<_, String>(4)?,
                    recorded_at: parse_datetime(&row.get::<_, String>(5)?)?,
                });
            }
            Ok(clips)
        })
        .await
    }

    pub async fn insert_history(&self, history_id: &str, summary: &IncidentSummary) -> Result<()> {
        let history_id = history_id.to_string();
        let record = summary.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO incident_history (id, incident_id, user_id, status, started_at, \
                     resolved_at, last_latitude, last_longitude, notified_contacts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    history_id,
                    record.incident_id,
                    record.user_id,
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.resolved_at.to_rfc3339(),
                    record.last_latitude,
                    record.last_longitude,
                    record.notified_contacts,
                ],
            )
            .with_context(|| "failed to insert history record")?;
            Ok(())
        })
        .await
    }

    pub async fn list_history(&self, user_id: &str) -> Result<Vec<IncidentSummary>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT incident_id, user_id, status, started_at, resolved_at, last_latitude, \
                     last_longitude, notified_contacts
                 FROM incident_history
                 WHERE user_id = ?1
                 ORDER BY resolved_at DESC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                summaries.push(IncidentSummary {
                    incident_id: row.get::<_, String>(0)?,
                    user_id: row.get::<_, String>(1)?,
                    status: status_from_str(&row.get::<_, String>(2)?)?,
                    started_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    resolved_at: parse_datetime(&row.get::<_, String>(4)?)?,
                    last_latitude: row.get::<_, f64>(5)?,
                    last_longitude: row.get::<_, f64>(6)?,
                    notified_contacts: row.get::<_, u32>(7)?,
                });
            }
            Ok(summaries)
        })
        .await
    }

    /// Marks any incident left ACTIVE by a crash as resolved. Returns the
    /// ids that were closed out.
    pub async fn recover_stale_incidents(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let stale = self.get_unresolved_incidents().await?;
        let mut recovered = Vec::with_capacity(stale.len());
        for incident in stale {
            self.mark_incident_resolved(&incident.id, now).await?;
            recovered.push(incident.id);
        }
        Ok(recovered)
    }
}
