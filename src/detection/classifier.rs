use anyhow::{bail, Result};

use super::{ViolationKind, ViolationSignal};
use crate::pose::FrameObservation;

#[derive(Debug, Clone, Copy)]
pub struct GazeThresholds {
    pub left_degrees: f64,
    pub right_degrees: f64,
}

impl GazeThresholds {
    pub fn new(left_degrees: f64, right_degrees: f64) -> Result<Self> {
        if left_degrees >= right_degrees {
            bail!(
                "left gaze threshold ({left_degrees}) must be below the right one ({right_degrees})"
            );
        }
        Ok(Self {
            left_degrees,
            right_degrees,
        })
    }
}

/// Map a frame observation to at most one violation. Pure: no cooldown or
/// escalation concerns here, so the on-screen indicator can be driven from
/// every frame.
pub fn classify(
    observation: &FrameObservation,
    thresholds: &GazeThresholds,
) -> Option<ViolationSignal> {
    if !observation.face_present {
        return Some(ViolationSignal::new(
            ViolationKind::NoFace,
            "No face detected in frame".to_string(),
            observation.timestamp_ms,
        ));
    }
    if observation.yaw_degrees < thresholds.left_degrees {
        return Some(ViolationSignal::new(
            ViolationKind::LookingLeft,
            format!("Student looked left ({:.1}\u{b0})", observation.yaw_degrees),
            observation.timestamp_ms,
        ));
    }
    if observation.yaw_degrees > thresholds.right_degrees {
        return Some(ViolationSignal::new(
            ViolationKind::LookingRight,
            format!(
                "Student looked right ({:.1}\u{b0})",
                observation.yaw_degrees
            ),
            observation.timestamp_ms,
        ));
    }
    None
}

/// Parallel input channel: a page-hidden event is a violation regardless of
/// any frame observation.
pub fn classify_visibility(hidden: bool, occurred_at_ms: i64) -> Option<ViolationSignal> {
    if !hidden {
        return None;
    }
    Some(ViolationSignal::new(
        ViolationKind::TabSwitch,
        "Tab or window switch detected".to_string(),
        occurred_at_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::HeadPose;

    fn thresholds() -> GazeThresholds {
        GazeThresholds::new(-25.0, 25.0).unwrap()
    }

    fn observation(yaw: f64) -> FrameObservation {
        FrameObservation::face(
            HeadPose {
                yaw_degrees: yaw,
                pitch_degrees: 0.0,
                roll_degrees: 0.0,
            },
            1000,
        )
    }

    #[test]
    fn forward_gaze_is_clean() {
        assert_eq!(classify(&observation(0.0), &thresholds()), None);
        assert_eq!(classify(&observation(-24.9), &thresholds()), None);
        assert_eq!(classify(&observation(24.9), &thresholds()), None);
    }

    #[test]
    fn thresholds_are_strict_bounds() {
        // Exactly at a threshold still counts as forward.
        assert_eq!(classify(&observation(-25.0), &thresholds()), None);
        assert_eq!(classify(&observation(25.0), &thresholds()), None);
    }

    #[test]
    fn yaw_below_left_threshold_is_looking_left() {
        let signal = classify(&observation(-30.0), &thresholds()).unwrap();
        assert_eq!(signal.kind, ViolationKind::LookingLeft);
        assert_eq!(signal.occurred_at_ms, 1000);
        assert!(signal.description.contains("-30.0"));
    }

    #[test]
    fn yaw_above_right_threshold_is_looking_right() {
        let signal = classify(&observation(40.0), &thresholds()).unwrap();
        assert_eq!(signal.kind, ViolationKind::LookingRight);
    }

    #[test]
    fn missing_face_wins_regardless_of_angles() {
        let mut observation = FrameObservation::absent(7);
        observation.yaw_degrees = -60.0;
        let signal = classify(&observation, &thresholds()).unwrap();
        assert_eq!(signal.kind, ViolationKind::NoFace);
    }

    #[test]
    fn hidden_page_maps_to_tab_switch() {
        let signal = classify_visibility(true, 42).unwrap();
        assert_eq!(signal.kind, ViolationKind::TabSwitch);
        assert_eq!(signal.occurred_at_ms, 42);
        assert_eq!(classify_visibility(false, 42), None);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        assert!(GazeThresholds::new(25.0, -25.0).is_err());
        assert!(GazeThresholds::new(10.0, 10.0).is_err());
    }
}
