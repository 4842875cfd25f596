use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{monitor_loop, MonitorContext};
use crate::pose::{FaceEngine, FrameSource};

/// Browser/host visibility change, timestamped by the host event source.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityEvent {
    pub hidden: bool,
    pub occurred_at_ms: i64,
}

/// Delivery channel for the asynchronously initialized face engine. An `Err`
/// carries the failure reason and puts the loop into degraded mode.
pub type EngineReceiver = oneshot::Receiver<std::result::Result<Box<dyn FaceEngine>, String>>;

/// Owns the detection loop task for one page's monitoring session.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    visibility_tx: Option<mpsc::UnboundedSender<VisibilityEvent>>,
}

impl MonitorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            visibility_tx: None,
        }
    }

    pub fn start(
        &mut self,
        context: MonitorContext,
        frames: Box<dyn FrameSource>,
        engine_rx: EngineReceiver,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("monitoring already active");
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let (visibility_tx, visibility_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(monitor_loop(context, frames, engine_rx, visibility_rx, token));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.visibility_tx = Some(visibility_tx);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Forward a visibility change into the loop; dropped silently when
    /// monitoring is not running.
    pub fn notify_visibility(&self, event: VisibilityEvent) {
        if let Some(tx) = &self.visibility_tx {
            let _ = tx.send(event);
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.visibility_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new()
    }
}
