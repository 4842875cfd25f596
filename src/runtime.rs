//! Per-page-load composition of the proctoring components.
//!
//! Each page load of the attempt builds a fresh `PageRuntime`: the lock
//! engages fail-closed, durable attempt state is read back, the session is
//! created or resumed, and monitoring starts only once the camera grant
//! arrives. There is no in-memory continuity across loads; everything that
//! must survive navigation lives in the attempt store or the database.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::config::ProctorConfig;
use crate::db::Database;
use crate::detection::EscalationCounter;
use crate::lock::{LockController, LockSurface};
use crate::models::Session;
use crate::monitor::{EngineReceiver, MonitorContext, MonitorController, VisibilityEvent};
use crate::pose::{FrameSource, PoseAdapter};
use crate::relay::AlertRelay;
use crate::storage::AttemptStore;
use crate::submission::{HostQuizPage, QuizStage, SequenceOutcome, SubmissionSequencer};
use crate::ui::StatusSink;

/// Identity of the page load being proctored.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub attempt_id: String,
    pub user_id: i64,
    pub exam_name: String,
    pub stage: QuizStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDisposition {
    /// Terminal review page: monitoring is done for this attempt.
    Terminal,
    /// The forced-submission sequence is driving this page.
    Forcing,
    /// Normal attempt page: locked, waiting for the camera grant.
    AwaitingCamera,
    /// Page with nothing to proctor (e.g. a summary outside forcing).
    Passive,
}

pub struct PageRuntime {
    config: ProctorConfig,
    db: Database,
    store: Arc<dyn AttemptStore>,
    attempt: AttemptContext,
    page: Arc<dyn HostQuizPage>,
    lock_surface: Arc<dyn LockSurface>,
    status: Arc<dyn StatusSink>,
    lock: Option<LockController>,
    sequencer: Option<SubmissionSequencer>,
    monitor: MonitorController,
    session: Option<Session>,
    disposition: Option<PageDisposition>,
}

impl PageRuntime {
    pub fn new(
        config: ProctorConfig,
        db: Database,
        store: Arc<dyn AttemptStore>,
        attempt: AttemptContext,
        page: Arc<dyn HostQuizPage>,
        lock_surface: Arc<dyn LockSurface>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let sequencer = SubmissionSequencer::new(store.clone());
        Self {
            config,
            db,
            store,
            attempt,
            page,
            lock_surface,
            status,
            lock: None,
            sequencer: Some(sequencer),
            monitor: MonitorController::new(),
            session: None,
            disposition: None,
        }
    }

    /// Load handler. Decides what this page is for and wires it up.
    pub async fn on_page_load(&mut self) -> Result<PageDisposition> {
        let disposition = match self.attempt.stage {
            QuizStage::Review => {
                let ended = self
                    .db
                    .end_active_sessions_for_user(self.attempt.user_id)
                    .await
                    .context("failed to close active sessions on review page")?;
                if ended > 0 {
                    info!("closed {ended} active proctoring session(s)");
                }
                self.resume_sequencer()?;
                PageDisposition::Terminal
            }
            QuizStage::Summary => match self.resume_sequencer()? {
                SequenceOutcome::Driving => PageDisposition::Forcing,
                _ => PageDisposition::Passive,
            },
            QuizStage::Attempt => {
                // Fail closed before anything else can happen on this page.
                let mut lock = LockController::new(self.lock_surface.clone());
                lock.engage_anti_tamper(self.config.tamper_check_interval_ms)?;
                self.lock = Some(lock);

                if let SequenceOutcome::Driving = self.resume_sequencer()? {
                    self.status.status("Finalizing submission...");
                    PageDisposition::Forcing
                } else {
                    let session = self
                        .db
                        .create_or_resume_session(self.attempt.user_id, &self.attempt.exam_name)
                        .await
                        .context("failed to create or resume proctoring session")?;
                    info!(
                        "proctoring session {} active for attempt {}",
                        session.id, self.attempt.attempt_id
                    );
                    self.session = Some(session);
                    self.status.status("Waiting for camera permission...");
                    PageDisposition::AwaitingCamera
                }
            }
        };

        self.disposition = Some(disposition);
        Ok(disposition)
    }

    /// Camera stream granted and producing frames: unlock the content and
    /// start the detection loop. The engine may still be loading; it arrives
    /// over `engine_rx`.
    pub fn on_camera_granted(
        &mut self,
        frames: Box<dyn FrameSource>,
        engine_rx: EngineReceiver,
    ) -> Result<()> {
        if self.disposition != Some(PageDisposition::AwaitingCamera) {
            bail!("page is not awaiting a camera grant");
        }
        let session = self
            .session
            .clone()
            .context("no active session for this page")?;

        if let Some(lock) = &self.lock {
            lock.unlock();
        }

        let relay = AlertRelay::new(
            self.db.clone(),
            session.id.clone(),
            session.user_id,
            self.config.screenshot_jpeg_quality,
        );
        let escalation = EscalationCounter::new(self.store.clone(), self.config.max_tab_switches);
        let sequencer = self
            .sequencer
            .take()
            .context("monitoring already started for this page")?;

        let context = MonitorContext {
            attempt_id: self.attempt.attempt_id.clone(),
            config: self.config.clone(),
            adapter: PoseAdapter::pending(),
            store: self.store.clone(),
            escalation,
            relay,
            sequencer,
            page: self.page.clone(),
            status: self.status.clone(),
        };

        self.monitor.start(context, frames, engine_rx)
    }

    /// Camera denied or unavailable: monitoring never starts and the lock
    /// stays engaged indefinitely.
    pub fn on_camera_denied(&self, reason: &str) {
        warn!("camera unavailable: {reason}");
        self.status.status(&format!(
            "Camera error: {reason}. Allow camera access and refresh the page."
        ));
    }

    /// Forward a host visibility change into the detection loop.
    pub fn notify_visibility(&self, hidden: bool, occurred_at_ms: i64) {
        self.monitor.notify_visibility(VisibilityEvent {
            hidden,
            occurred_at_ms,
        });
    }

    /// Explicit student-driven end of the exam: stop monitoring and close
    /// the session.
    pub async fn end_exam(&mut self) -> Result<()> {
        self.monitor.stop().await?;
        if let Some(session) = self.session.take() {
            self.db
                .end_session(&session.id)
                .await
                .context("failed to end proctoring session")?;
        }
        if let Some(lock) = self.lock.as_mut() {
            lock.shutdown();
        }
        Ok(())
    }

    /// Page navigation teardown: stop background tasks but leave the session
    /// active for the next page of the attempt.
    pub async fn teardown(&mut self) -> Result<()> {
        self.monitor.stop().await?;
        if let Some(lock) = self.lock.as_mut() {
            lock.shutdown();
        }
        Ok(())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn monitoring_active(&self) -> bool {
        self.monitor.is_active()
    }

    fn resume_sequencer(&mut self) -> Result<SequenceOutcome> {
        match self.sequencer.as_mut() {
            Some(sequencer) => {
                sequencer.resume_on_page_load(&self.attempt.attempt_id, self.page.as_ref())
            }
            None => Ok(SequenceOutcome::Idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::HeadPose;
    use crate::storage::MemoryAttemptStore;
    use crate::trace::{replay, TraceEvent};
    use uuid::Uuid;

    fn temp_db() -> Database {
        let path =
            std::env::temp_dir().join(format!("examsentry-runtime-{}.sqlite3", Uuid::new_v4()));
        Database::new(path).unwrap()
    }

    fn fast_config() -> ProctorConfig {
        ProctorConfig {
            frame_poll_interval_ms: 10,
            ..ProctorConfig::default()
        }
    }

    fn pose(yaw: f64) -> Option<HeadPose> {
        Some(HeadPose {
            yaw_degrees: yaw,
            pitch_degrees: 0.0,
            roll_degrees: 0.0,
        })
    }

    fn monitored_attempt_prelude() -> Vec<TraceEvent> {
        vec![
            TraceEvent::PageLoad {
                stage: QuizStage::Attempt,
            },
            TraceEvent::CameraGranted,
            TraceEvent::EngineReady,
        ]
    }

    #[tokio::test]
    async fn scenario_cooldown_suppresses_repeated_look_left() {
        let db = temp_db();
        let store = Arc::new(MemoryAttemptStore::new());

        let mut events = monitored_attempt_prelude();
        for (timestamp_ms, yaw) in [(0, 0.0), (100, -30.0), (200, -30.0), (300, 0.0)] {
            events.push(TraceEvent::Frame {
                timestamp_ms,
                pose: pose(yaw),
            });
        }
        events.push(TraceEvent::EndExam);

        let summary = replay(&events, fast_config(), db, store, "a-1", 7, "Midterm")
            .await
            .unwrap();

        let look_left = summary
            .alerts
            .iter()
            .filter(|alert| alert.alert_type == "looking_left")
            .count();
        assert_eq!(look_left, 1, "second -30 frame must be cooldown-suppressed");
        assert_eq!(summary.alerts.len(), 1);
        assert_eq!(summary.screenshot_count, 1);
        assert!(!summary.force_submit_armed);
    }

    #[tokio::test]
    async fn scenario_three_tab_switches_force_submission_across_reloads() {
        let db = temp_db();
        let store: Arc<MemoryAttemptStore> = Arc::new(MemoryAttemptStore::new());

        let mut events = monitored_attempt_prelude();
        for timestamp_ms in [1000, 2000, 3000] {
            events.push(TraceEvent::Visibility {
                hidden: true,
                timestamp_ms,
            });
        }

        let summary = replay(
            &events,
            fast_config(),
            db.clone(),
            store.clone(),
            "a-2",
            7,
            "Midterm",
        )
        .await
        .unwrap();

        assert_eq!(summary.tab_switch_count, 3);
        assert!(summary.force_submit_armed);
        assert_eq!(summary.form_submissions, 1);
        let tab_alerts = summary
            .alerts
            .iter()
            .filter(|alert| alert.alert_type == "tab_switch")
            .count();
        assert_eq!(tab_alerts, 3);
        // Tab switches never carry screenshots.
        assert_eq!(summary.screenshot_count, 0);

        // Simulated reload: a fresh page keeps driving the submission.
        let reload = vec![TraceEvent::PageLoad {
            stage: QuizStage::Attempt,
        }];
        let summary = replay(
            &reload,
            fast_config(),
            db.clone(),
            store.clone(),
            "a-2",
            7,
            "Midterm",
        )
        .await
        .unwrap();
        assert!(summary.force_submit_armed);
        assert_eq!(summary.form_submissions, 1);

        // The terminal review page clears the attempt state.
        let review = vec![TraceEvent::PageLoad {
            stage: QuizStage::Review,
        }];
        let summary = replay(&review, fast_config(), db, store, "a-2", 7, "Midterm")
            .await
            .unwrap();
        assert!(!summary.force_submit_armed);
        assert_eq!(summary.tab_switch_count, 0);
    }

    #[tokio::test]
    async fn missing_face_raises_an_alert_with_screenshot() {
        let db = temp_db();
        let store = Arc::new(MemoryAttemptStore::new());

        let mut events = monitored_attempt_prelude();
        events.push(TraceEvent::Frame {
            timestamp_ms: 0,
            pose: None,
        });
        events.push(TraceEvent::EndExam);

        let summary = replay(&events, fast_config(), db, store, "a-3", 7, "Midterm")
            .await
            .unwrap();

        assert_eq!(summary.alerts.len(), 1);
        assert_eq!(summary.alerts[0].alert_type, "missing_face");
        assert_eq!(summary.screenshot_count, 1);
    }

    #[tokio::test]
    async fn degraded_engine_never_raises_violations() {
        let db = temp_db();
        let store = Arc::new(MemoryAttemptStore::new());

        let events = vec![
            TraceEvent::PageLoad {
                stage: QuizStage::Attempt,
            },
            TraceEvent::CameraGranted,
            TraceEvent::EngineFailed {
                reason: "model download failed".to_string(),
            },
            TraceEvent::Frame {
                timestamp_ms: 0,
                pose: None,
            },
            TraceEvent::Frame {
                timestamp_ms: 100,
                pose: None,
            },
            TraceEvent::EndExam,
        ];

        let summary = replay(&events, fast_config(), db, store, "a-4", 7, "Midterm")
            .await
            .unwrap();

        assert!(summary.alerts.is_empty());
        assert_eq!(summary.screenshot_count, 0);
    }
}
