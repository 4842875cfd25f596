//! Trace replay: drive a full simulated attempt through the real runtime.
//!
//! A trace is JSONL, one event per line (`#` lines are comments). The replay
//! driver builds scripted camera/engine adapters from the recorded frames
//! and walks the page-load/visibility events against a real database, which
//! makes it both a demo harness and the backing for end-to-end tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

use crate::config::ProctorConfig;
use crate::db::Database;
use crate::lock::LockSurface;
use crate::models::AlertRecord;
use crate::pose::{
    FaceDetection, FaceEngine, FaceTransform, FrameSource, HeadPose, VideoFrame,
};
use crate::runtime::{AttemptContext, PageRuntime};
use crate::storage::AttemptStore;
use crate::submission::{self, HostQuizPage, QuizStage};
use crate::ui::{LogStatusSink, StatusSink};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    PageLoad { stage: QuizStage },
    CameraGranted,
    CameraDenied { reason: String },
    EngineReady,
    EngineFailed { reason: String },
    /// One camera frame; `pose: null` means no face was visible.
    Frame {
        timestamp_ms: i64,
        pose: Option<HeadPose>,
    },
    Visibility { hidden: bool, timestamp_ms: i64 },
    EndExam,
}

pub fn parse_trace(contents: &str) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TraceEvent = serde_json::from_str(line)
            .with_context(|| format!("invalid trace event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Shared frame queue; the handle stays with the script while the source is
/// handed to the monitor loop.
#[derive(Clone, Default)]
pub struct FrameScript {
    inner: Arc<Mutex<VecDeque<VideoFrame>>>,
}

impl FrameScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: VideoFrame) {
        self.inner.lock().unwrap().push_back(frame);
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn source(&self) -> ScriptedFrameSource {
        ScriptedFrameSource {
            inner: self.inner.clone(),
        }
    }
}

pub struct ScriptedFrameSource {
    inner: Arc<Mutex<VecDeque<VideoFrame>>>,
}

impl FrameSource for ScriptedFrameSource {
    fn poll_frame(&mut self) -> Option<VideoFrame> {
        self.inner.lock().unwrap().pop_front()
    }
}

/// Engine that replays recorded detections keyed by frame timestamp.
#[derive(Default)]
pub struct ScriptedFaceEngine {
    detections: HashMap<i64, Option<FaceDetection>>,
}

impl ScriptedFaceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, timestamp_ms: i64, pose: Option<HeadPose>) {
        let detection = pose.map(|pose| FaceDetection {
            transform: Some(FaceTransform::from_euler_degrees(
                pose.yaw_degrees,
                pose.pitch_degrees,
                pose.roll_degrees,
            )),
            landmarks: None,
        });
        self.detections.insert(timestamp_ms, detection);
    }
}

impl FaceEngine for ScriptedFaceEngine {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceDetection>> {
        Ok(self
            .detections
            .get(&frame.timestamp_ms)
            .cloned()
            .unwrap_or(None))
    }
}

/// Lock surface double that mimics a tamperable page.
#[derive(Default)]
pub struct SimulatedLockSurface {
    locked: AtomicBool,
    blocker_present: AtomicBool,
    blocker_visible: AtomicBool,
    reloads: AtomicU32,
}

impl SimulatedLockSurface {
    pub fn new() -> Self {
        let surface = Self::default();
        surface.blocker_present.store(true, Ordering::SeqCst);
        surface.blocker_visible.store(true, Ordering::SeqCst);
        surface
    }

    pub fn reload_count(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn remove_blocker(&self) {
        self.blocker_present.store(false, Ordering::SeqCst);
    }
}

impl LockSurface for SimulatedLockSurface {
    fn apply_lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    fn clear_lock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    fn lock_applied(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn blocker_present(&self) -> bool {
        self.blocker_present.load(Ordering::SeqCst)
    }

    fn blocker_visible(&self) -> bool {
        self.blocker_visible.load(Ordering::SeqCst)
    }

    fn restore_blocker(&self) {
        self.blocker_visible.store(true, Ordering::SeqCst);
    }

    fn reload_page(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Quiz page double recording which submission affordances were driven.
pub struct SimulatedQuizPage {
    stage: Mutex<QuizStage>,
    has_form: AtomicBool,
    has_finish_control: AtomicBool,
    form_submissions: AtomicU32,
    finish_clicks: AtomicU32,
    reloads: AtomicU32,
    overlay_visible: AtomicBool,
    notices: Mutex<Vec<String>>,
}

impl SimulatedQuizPage {
    pub fn new(stage: QuizStage) -> Self {
        Self {
            stage: Mutex::new(stage),
            has_form: AtomicBool::new(true),
            has_finish_control: AtomicBool::new(true),
            form_submissions: AtomicU32::new(0),
            finish_clicks: AtomicU32::new(0),
            reloads: AtomicU32::new(0),
            overlay_visible: AtomicBool::new(false),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn set_stage(&self, stage: QuizStage) {
        *self.stage.lock().unwrap() = stage;
    }

    pub fn form_submission_count(&self) -> u32 {
        self.form_submissions.load(Ordering::SeqCst)
    }

    pub fn finish_click_count(&self) -> u32 {
        self.finish_clicks.load(Ordering::SeqCst)
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl HostQuizPage for SimulatedQuizPage {
    fn stage(&self) -> QuizStage {
        *self.stage.lock().unwrap()
    }

    fn show_finalizing_overlay(&self, _message: &str) {
        self.overlay_visible.store(true, Ordering::SeqCst);
    }

    fn hide_overlay(&self) {
        self.overlay_visible.store(false, Ordering::SeqCst);
    }

    fn submit_attempt_form(&self) -> bool {
        if self.has_form.load(Ordering::SeqCst) {
            self.form_submissions.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn click_finish_control(&self) -> bool {
        if self.has_finish_control.load(Ordering::SeqCst) {
            self.finish_clicks.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

#[derive(Debug)]
pub struct ReplaySummary {
    pub session_id: Option<String>,
    pub alerts: Vec<AlertRecord>,
    pub screenshot_count: i64,
    pub tab_switch_count: u32,
    pub force_submit_armed: bool,
    pub form_submissions: u32,
}

/// Walk a trace through the real runtime. Frames are queued up front and
/// consumed by the detection loop at its own tick pace; visibility and page
/// events apply in trace order.
pub async fn replay(
    events: &[TraceEvent],
    config: ProctorConfig,
    db: Database,
    store: Arc<dyn AttemptStore>,
    attempt_id: &str,
    user_id: i64,
    exam_name: &str,
) -> Result<ReplaySummary> {
    config.validate()?;

    let page = Arc::new(SimulatedQuizPage::new(QuizStage::Attempt));
    let lock_surface = Arc::new(SimulatedLockSurface::new());
    let status: Arc<dyn StatusSink> = Arc::new(LogStatusSink);

    let frames = FrameScript::new();
    let mut engine = ScriptedFaceEngine::new();
    for event in events {
        if let TraceEvent::Frame { timestamp_ms, pose } = event {
            engine.insert(*timestamp_ms, *pose);
            frames.push(VideoFrame::solid(*timestamp_ms, 64, 48, [96, 96, 96]));
        }
    }
    let mut engine = Some(engine);

    let mut runtime: Option<PageRuntime> = None;
    let mut engine_tx: Option<oneshot::Sender<std::result::Result<Box<dyn FaceEngine>, String>>> =
        None;
    let mut session_id: Option<String> = None;
    let frame_interval = Duration::from_millis(config.frame_poll_interval_ms);

    for event in events {
        match event {
            TraceEvent::PageLoad { stage } => {
                if let Some(mut previous) = runtime.take() {
                    previous.teardown().await?;
                }
                page.set_stage(*stage);
                let attempt = AttemptContext {
                    attempt_id: attempt_id.to_string(),
                    user_id,
                    exam_name: exam_name.to_string(),
                    stage: *stage,
                };
                let mut fresh = PageRuntime::new(
                    config.clone(),
                    db.clone(),
                    store.clone(),
                    attempt,
                    page.clone(),
                    lock_surface.clone(),
                    status.clone(),
                );
                let disposition = fresh.on_page_load().await?;
                log::info!("page load at {stage:?} -> {disposition:?}");
                if let Some(session) = fresh.session() {
                    session_id = Some(session.id.clone());
                }
                runtime = Some(fresh);
            }
            TraceEvent::CameraGranted => {
                let runtime = runtime
                    .as_mut()
                    .context("camera granted before any page load")?;
                let (tx, rx) = oneshot::channel();
                engine_tx = Some(tx);
                runtime.on_camera_granted(Box::new(frames.source()), rx)?;
            }
            TraceEvent::CameraDenied { reason } => {
                runtime
                    .as_ref()
                    .context("camera denied before any page load")?
                    .on_camera_denied(reason);
            }
            TraceEvent::EngineReady => {
                if let Some(tx) = engine_tx.take() {
                    let engine = engine.take().context("engine already delivered")?;
                    let _ = tx.send(Ok(Box::new(engine)));
                }
            }
            TraceEvent::EngineFailed { reason } => {
                if let Some(tx) = engine_tx.take() {
                    let _ = tx.send(Err(reason.clone()));
                }
            }
            TraceEvent::Frame { .. } => {
                // Frames were queued up front; give the loop one tick to
                // consume this one so ordering roughly matches the recording.
                sleep(frame_interval).await;
            }
            TraceEvent::Visibility {
                hidden,
                timestamp_ms,
            } => {
                if let Some(runtime) = runtime.as_ref() {
                    runtime.notify_visibility(*hidden, *timestamp_ms);
                }
                // Let the loop drain the event before the next one lands.
                sleep(frame_interval).await;
            }
            TraceEvent::EndExam => {
                if let Some(runtime) = runtime.as_mut() {
                    runtime.end_exam().await?;
                }
            }
        }
    }

    // Let spawned relay dispatches settle before reading back.
    sleep(Duration::from_millis(250)).await;
    if let Some(mut runtime) = runtime.take() {
        runtime.teardown().await?;
    }

    let (alerts, screenshot_count) = match &session_id {
        Some(id) => (
            db.list_alerts_for_session(id).await?,
            db.count_screenshots_for_session(id).await?,
        ),
        None => (Vec::new(), 0),
    };

    let tab_switch_count = store
        .get(&crate::storage::tab_switch_count_key(attempt_id))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    Ok(ReplaySummary {
        session_id,
        alerts,
        screenshot_count,
        tab_switch_count,
        force_submit_armed: submission::force_submit_armed(store.as_ref(), attempt_id),
        form_submissions: page.form_submission_count(),
    })
}
