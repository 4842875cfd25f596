//! Thin seam to whatever renders the monitoring widget. The engine only
//! pushes strings and per-frame gaze updates; presentation is the host's
//! problem.

use crate::pose::FrameObservation;

pub trait StatusSink: Send + Sync {
    /// Widget status line ("Loading detection model...", "Monitoring active").
    fn status(&self, text: &str);
    /// Transient on-screen warning banner.
    fn warning(&self, text: &str);
    /// Per-frame gaze indicator update.
    fn gaze(&self, observation: &FrameObservation);
}

/// Default sink that forwards everything to the log.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn status(&self, text: &str) {
        log::info!("status: {text}");
    }

    fn warning(&self, text: &str) {
        log::warn!("warning: {text}");
    }

    fn gaze(&self, observation: &FrameObservation) {
        if observation.face_present {
            log::debug!(
                "gaze: yaw {:.1}\u{b0} pitch {:.1}\u{b0} roll {:.1}\u{b0}",
                observation.yaw_degrees,
                observation.pitch_degrees,
                observation.roll_degrees
            );
        } else {
            log::debug!("gaze: no face in frame");
        }
    }
}
