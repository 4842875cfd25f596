//! Quiz-content lock with periodic anti-tamper re-assertion.
//!
//! Every page load starts locked; the one-way unlock fires when the camera
//! stream is confirmed active. While locked, a background task re-asserts
//! the locked treatment against tampering and treats structural removal of
//! the blocking element as fatal to the page.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Host-page surface the lock is enforced against.
pub trait LockSurface: Send + Sync {
    /// Blur/disable/collapse the quiz content.
    fn apply_lock(&self);
    /// Restore full interactivity.
    fn clear_lock(&self);
    fn lock_applied(&self) -> bool;
    /// Whether the blocking element is still attached to the page.
    fn blocker_present(&self) -> bool;
    fn blocker_visible(&self) -> bool;
    fn restore_blocker(&self);
    /// Fatal tamper response: reload to a clean locked state.
    fn reload_page(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

pub struct LockController {
    surface: Arc<dyn LockSurface>,
    unlocked: Arc<AtomicBool>,
    tamper_task: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl LockController {
    /// Fail closed: content is locked the moment the controller exists.
    pub fn new(surface: Arc<dyn LockSurface>) -> Self {
        surface.apply_lock();
        Self {
            surface,
            unlocked: Arc::new(AtomicBool::new(false)),
            tamper_task: None,
            cancel_token: None,
        }
    }

    pub fn state(&self) -> LockState {
        if self.unlocked.load(Ordering::SeqCst) {
            LockState::Unlocked
        } else {
            LockState::Locked
        }
    }

    /// Start the periodic re-assertion task. The task idles once unlocked.
    pub fn engage_anti_tamper(&mut self, check_interval_ms: u64) -> Result<()> {
        if self.tamper_task.is_some() {
            bail!("anti-tamper task already running");
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let surface = self.surface.clone();
        let unlocked = self.unlocked.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(check_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if unlocked.load(Ordering::SeqCst) {
                            continue;
                        }
                        tamper_tick(surface.as_ref());
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        self.tamper_task = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// One-way transition fired when the camera begins producing frames.
    /// Re-invoking is a no-op; the page stays unlocked for its lifetime.
    pub fn unlock(&self) {
        if self.unlocked.swap(true, Ordering::SeqCst) {
            return;
        }
        self.surface.clear_lock();
        log_info!("quiz content unlocked");
    }

    pub fn shutdown(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.tamper_task.take();
    }
}

impl Drop for LockController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

/// One anti-tamper pass. Runs only while locked; a missing blocker forces a
/// reload on every tick in which the condition holds.
pub fn tamper_tick(surface: &dyn LockSurface) {
    if !surface.lock_applied() {
        log_warn!("tampering detected: re-locking quiz content");
        surface.apply_lock();
    }

    if !surface.blocker_present() {
        log_warn!("blocking element removed from page; forcing reload");
        surface.reload_page();
        return;
    }

    if !surface.blocker_visible() {
        surface.restore_blocker();
    }
}
