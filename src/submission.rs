//! Forced-submission sequencer.
//!
//! The quiz platform renders each attempt page, the summary, and the review
//! as separate page loads, so this state machine keeps its one bit of state
//! (`NORMAL` vs `FORCING`) in the durable attempt store and re-reads it on
//! every load. Each page is a fresh process invocation from its point of
//! view: read the store, drive the host form, maybe write back, terminate.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::{self, AttemptStore};

const ENABLE_LOGS: bool = true;
use crate::log_info;

pub const FINALIZING_MESSAGE: &str = "Maximum violations reached. Finalizing submission...";
pub const AUTO_SUBMITTED_NOTICE: &str =
    "Your exam was automatically submitted due to security violations.";

/// Which stage of the host quiz flow the current page load represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuizStage {
    Attempt,
    Summary,
    Review,
}

/// Host-platform surface the sequencer drives.
pub trait HostQuizPage: Send + Sync {
    fn stage(&self) -> QuizStage;
    fn show_finalizing_overlay(&self, message: &str);
    fn hide_overlay(&self);
    /// Inject the finish fields into the host form and submit it. False when
    /// the form is absent on this page.
    fn submit_attempt_form(&self) -> bool;
    /// Click the host's natural finish control. False when absent.
    fn click_finish_control(&self) -> bool;
    fn reload(&self);
    fn notify(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// No forced submission in effect.
    Idle,
    /// Forcing: this page's submission affordance has been driven.
    Driving,
    /// Terminal review stage reached; attempt state cleared.
    Completed,
}

pub fn force_submit_armed(store: &dyn AttemptStore, attempt_id: &str) -> bool {
    store.get(&storage::force_submit_key(attempt_id)).as_deref() == Some("1")
}

pub struct SubmissionSequencer {
    store: Arc<dyn AttemptStore>,
    driven: bool,
}

impl SubmissionSequencer {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self {
            store,
            driven: false,
        }
    }

    /// Arm the durable flag, then drive the current page. The flag is
    /// persisted before anything else so a navigation racing this call
    /// cannot lose the decision.
    pub fn trigger(&mut self, attempt_id: &str, page: &dyn HostQuizPage) -> Result<SequenceOutcome> {
        self.store
            .set(&storage::force_submit_key(attempt_id), "1")
            .context("failed to persist force-submit flag")?;
        log_info!("forced submission armed for attempt {attempt_id}");
        self.resume_on_page_load(attempt_id, page)
    }

    /// Page-load resume handler. Idempotent within a page: a re-run load
    /// handler will not submit the host form twice.
    pub fn resume_on_page_load(
        &mut self,
        attempt_id: &str,
        page: &dyn HostQuizPage,
    ) -> Result<SequenceOutcome> {
        if !force_submit_armed(self.store.as_ref(), attempt_id) {
            return Ok(SequenceOutcome::Idle);
        }

        page.show_finalizing_overlay(FINALIZING_MESSAGE);

        match page.stage() {
            QuizStage::Attempt | QuizStage::Summary => {
                if self.driven {
                    return Ok(SequenceOutcome::Driving);
                }
                self.driven = true;

                if page.submit_attempt_form() {
                    log_info!("submitted host quiz form for attempt {attempt_id}");
                } else if page.click_finish_control() {
                    log_info!("clicked host finish control for attempt {attempt_id}");
                } else {
                    // Never leave the attempt stuck unsubmitted.
                    log_info!("no submission affordance found; reloading page");
                    page.reload();
                }
                Ok(SequenceOutcome::Driving)
            }
            QuizStage::Review => {
                self.store
                    .remove(&storage::force_submit_key(attempt_id))
                    .context("failed to clear force-submit flag")?;
                self.store
                    .remove(&storage::tab_switch_count_key(attempt_id))
                    .context("failed to clear tab switch count")?;
                page.hide_overlay();
                page.notify(AUTO_SUBMITTED_NOTICE);
                Ok(SequenceOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAttemptStore;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakePage {
        stage: Mutex<QuizStage>,
        has_form: AtomicBool,
        has_finish_control: AtomicBool,
        form_submissions: AtomicU32,
        finish_clicks: AtomicU32,
        reloads: AtomicU32,
        overlay_shown: AtomicU32,
        notices: Mutex<Vec<String>>,
    }

    impl FakePage {
        fn new(stage: QuizStage) -> Self {
            Self {
                stage: Mutex::new(stage),
                has_form: AtomicBool::new(true),
                has_finish_control: AtomicBool::new(true),
                form_submissions: AtomicU32::new(0),
                finish_clicks: AtomicU32::new(0),
                reloads: AtomicU32::new(0),
                overlay_shown: AtomicU32::new(0),
                notices: Mutex::new(Vec::new()),
            }
        }
    }

    impl HostQuizPage for FakePage {
        fn stage(&self) -> QuizStage {
            *self.stage.lock().unwrap()
        }

        fn show_finalizing_overlay(&self, _message: &str) {
            self.overlay_shown.fetch_add(1, Ordering::SeqCst);
        }

        fn hide_overlay(&self) {}

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

    #[test]
    fn idle_when_flag_is_not_armed() {
        let store = Arc::new(MemoryAttemptStore::new());
        let mut sequencer = SubmissionSequencer::new(store);
        let page = FakePage::new(QuizStage::Attempt);
        let outcome = sequencer.resume_on_page_load("a1", &page).unwrap();
        assert_eq!(outcome, SequenceOutcome::Idle);
        assert_eq!(page.form_submissions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trigger_persists_flag_and_submits_the_form() {
        let store = Arc::new(MemoryAttemptStore::new());
        let mut sequencer = SubmissionSequencer::new(store.clone());
        let page = FakePage::new(QuizStage::Attempt);

        let outcome = sequencer.trigger("a1", &page).unwrap();
        assert_eq!(outcome, SequenceOutcome::Driving);
        assert!(force_submit_armed(store.as_ref(), "a1"));
        assert_eq!(page.form_submissions.load(Ordering::SeqCst), 1);
        assert_eq!(page.overlay_shown.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rerun_load_handler_does_not_double_submit() {
        let store = Arc::new(MemoryAttemptStore::new());
        let mut sequencer = SubmissionSequencer::new(store.clone());
        let page = FakePage::new(QuizStage::Attempt);

        sequencer.trigger("a1", &page).unwrap();
        let outcome = sequencer.resume_on_page_load("a1", &page).unwrap();
        assert_eq!(outcome, SequenceOutcome::Driving);
        assert_eq!(page.form_submissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fresh_page_load_resumes_from_the_durable_flag() {
        let store = Arc::new(MemoryAttemptStore::new());
        SubmissionSequencer::new(store.clone())
            .trigger("a1", &FakePage::new(QuizStage::Attempt))
            .unwrap();

        // A reload constructs a new sequencer; only the store carries over.
        let mut resumed = SubmissionSequencer::new(store.clone());
        let summary = FakePage::new(QuizStage::Summary);
        let outcome = resumed.resume_on_page_load("a1", &summary).unwrap();
        assert_eq!(outcome, SequenceOutcome::Driving);
        assert_eq!(summary.form_submissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_back_to_finish_control_then_reload() {
        let store = Arc::new(MemoryAttemptStore::new());
        let mut sequencer = SubmissionSequencer::new(store.clone());
        let page = FakePage::new(QuizStage::Attempt);
        page.has_form.store(false, Ordering::SeqCst);

        sequencer.trigger("a1", &page).unwrap();
        assert_eq!(page.finish_clicks.load(Ordering::SeqCst), 1);
        assert_eq!(page.reloads.load(Ordering::SeqCst), 0);

        let mut next = SubmissionSequencer::new(store);
        let bare = FakePage::new(QuizStage::Attempt);
        bare.has_form.store(false, Ordering::SeqCst);
        bare.has_finish_control.store(false, Ordering::SeqCst);
        next.resume_on_page_load("a1", &bare).unwrap();
        assert_eq!(bare.reloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn review_stage_clears_state_and_notifies_once() {
        let store = Arc::new(MemoryAttemptStore::new());
        store
            .set(&storage::force_submit_key("a1"), "1")
            .unwrap();
        store
            .set(&storage::tab_switch_count_key("a1"), "3")
            .unwrap();

        let mut sequencer = SubmissionSequencer::new(store.clone());
        let review = FakePage::new(QuizStage::Review);
        let outcome = sequencer.resume_on_page_load("a1", &review).unwrap();
        assert_eq!(outcome, SequenceOutcome::Completed);
        assert!(!force_submit_armed(store.as_ref(), "a1"));
        assert_eq!(store.get(&storage::tab_switch_count_key("a1")), None);
        assert_eq!(
            review.notices.lock().unwrap().as_slice(),
            &[AUTO_SUBMITTED_NOTICE.to_string()]
        );

        // A later load of the review page is quiet: the flag is gone.
        let mut again = SubmissionSequencer::new(store);
        let outcome = again.resume_on_page_load("a1", &review).unwrap();
        assert_eq!(outcome, SequenceOutcome::Idle);
        assert_eq!(review.notices.lock().unwrap().len(), 1);
    }
}
