//! Session/alert persistence behind a dedicated worker thread.
//!
//! All SQLite access funnels through one thread; callers enqueue closures
//! and await the reply over a oneshot channel, so the async detection loop
//! never blocks on disk I/O.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;
use uuid::Uuid;

mod migrations;

use crate::models::{AlertRecord, NewAlert, Session, SessionOverview, SessionStatus};
use migrations::run_migrations;

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

fn status_from_str(value: &str) -> Result<SessionStatus> {
    match value {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        _ => Err(anyhow!("unknown session status '{value}'")),
    }
}

fn session_from_row(row: &Row<'_>) -> Result<Session> {
    Ok(Session {
        id: row.get::<_, String>(0)?,
        user_id: row.get::<_, i64>(1)?,
        exam_name: row.get::<_, String>(2)?,
        status: status_from_str(&row.get::<_, String>(3)?)?,
        started_at: parse_datetime(&row.get::<_, String>(4)?)?,
        ended_at: row
            .get::<_, Option<String>>(5)?
            .map(|value| parse_datetime(&value))
            .transpose()?,
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(7)?)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, user_id, exam_name, status, started_at, ended_at, created_at, updated_at";

/// Strip a `data:image/<fmt>;base64,` prefix if present; the raw payload is
/// returned unchanged otherwise.
fn strip_data_uri_prefix(raw: &str) -> &str {
    match raw.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:image/") => payload,
        _ => raw,
    }
}

/// Validate and normalize a screenshot payload for storage. Rejects
/// malformed base64 rather than persisting garbage.
fn sanitize_screenshot(raw: &str) -> Result<String> {
    let payload = strip_data_uri_prefix(raw);
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("invalid base64 image payload")?;
    Ok(payload.to_string())
}

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
            .name("examsentry-db".into())
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

    /// Return the caller's active session if one exists, otherwise insert a
    /// fresh one. Idempotent per active attempt.
    pub async fn create_or_resume_session(
        &self,
        user_id: i64,
        exam_name: &str,
    ) -> Result<Session> {
        let exam_name = exam_name.to_string();
        self.execute(move |conn| {
            let existing = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE user_id = ?1 AND status = 'active'
                     ORDER BY started_at DESC
                     LIMIT 1"
                ))?;
                let mut rows = stmt.query(params![user_id])?;
                match rows.next()? {
                    Some(row) => Some(session_from_row(row)?),
                    None => None,
                }
            };

            if let Some(session) = existing {
                return Ok(session);
            }

            let now = Utc::now();
            let session = Session {
                id: Uuid::new_v4().to_string(),
                user_id,
                exam_name,
                status: SessionStatus::Active,
                started_at: now,
                ended_at: None,
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO sessions (id, user_id, exam_name, status, started_at, ended_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id,
                    session.user_id,
                    session.exam_name,
                    session.status.as_str(),
                    session.started_at.to_rfc3339(),
                    Option::<String>::None,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert session")?;

            Ok(session)
        })
        .await
    }

    /// Persist one alert and, when present, its screenshot. A malformed
    /// screenshot payload is logged and dropped without failing the alert.
    pub async fn log_alert(&self, alert: NewAlert) -> Result<i64> {
        self.execute(move |conn| {
            let session_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![alert.session_id],
                |row| row.get(0),
            )?;
            if !session_exists {
                bail!("unknown session '{}'", alert.session_id);
            }

            let now = Utc::now();
            conn.execute(
                "INSERT INTO alerts (session_id, user_id, alert_type, description, severity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    alert.session_id,
                    alert.user_id,
                    alert.alert_type,
                    alert.description,
                    alert.severity,
                    now.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert alert")?;
            let alert_id = conn.last_insert_rowid();

            if let Some(raw) = alert.screenshot.as_deref() {
                if !raw.is_empty() {
                    match sanitize_screenshot(raw) {
                        Ok(image_data) => {
                            conn.execute(
                                "INSERT INTO screenshots (alert_id, session_id, user_id, image_data, created_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5)",
                                params![
                                    alert_id,
                                    alert.session_id,
                                    alert.user_id,
                                    image_data,
                                    now.to_rfc3339(),
                                ],
                            )
                            .with_context(|| "failed to insert screenshot")?;
                        }
                        Err(err) => {
                            error!("discarding malformed screenshot for alert {alert_id}: {err:#}");
                        }
                    }
                }
            }

            Ok(alert_id)
        })
        .await
    }

    /// Mark a session completed. Idempotent: ending an already-completed or
    /// unknown session is a no-op.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions
                 SET status = 'completed',
                     ended_at = COALESCE(ended_at, ?1),
                     updated_at = ?1
                 WHERE id = ?2 AND status = 'active'",
                params![now, session_id],
            )
            .with_context(|| "failed to end session")?;
            Ok(())
        })
        .await
    }

    /// Close every active session a user still has open; the terminal review
    /// page calls this so no session is left dangling.
    pub async fn end_active_sessions_for_user(&self, user_id: i64) -> Result<usize> {
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let affected = conn
                .execute(
                    "UPDATE sessions
                     SET status = 'completed',
                         ended_at = COALESCE(ended_at, ?1),
                         updated_at = ?1
                     WHERE user_id = ?2 AND status = 'active'",
                    params![now, user_id],
                )
                .with_context(|| "failed to close active sessions")?;
            Ok(affected)
        })
        .await
    }

    /// Active sessions with alert counts, polled by the instructor dashboard.
    pub async fn list_active_sessions(&self) -> Result<Vec<SessionOverview>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.user_id, s.exam_name, s.started_at,
                        (SELECT COUNT(*) FROM alerts a WHERE a.session_id = s.id) AS alert_count
                 FROM sessions s
                 WHERE s.status = 'active'
                 ORDER BY s.started_at DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(SessionOverview {
                    session_id: row.get(0)?,
                    user_id: row.get(1)?,
                    exam_name: row.get(2)?,
                    started_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    alert_count: row.get(4)?,
                });
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn list_alerts_for_session(&self, session_id: &str) -> Result<Vec<AlertRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, user_id, alert_type, description, severity, created_at
                 FROM alerts
                 WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut alerts = Vec::new();
            while let Some(row) = rows.next()? {
                alerts.push(AlertRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    user_id: row.get(2)?,
                    alert_type: row.get(3)?,
                    description: row.get(4)?,
                    severity: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?)?,
                });
            }

            Ok(alerts)
        })
        .await
    }

    pub async fn count_screenshots_for_session(&self, session_id: &str) -> Result<i64> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM screenshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
