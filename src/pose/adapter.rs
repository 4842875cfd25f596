use log::warn;

use super::{FaceDetection, FaceEngine, FaceLandmarks, FrameObservation, HeadPose, VideoFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Initializing,
    Ready,
    Degraded,
}

enum EngineSlot {
    Initializing,
    Ready(Box<dyn FaceEngine>),
    Degraded,
}

/// Wraps the inference engine and normalizes its output into
/// [`FrameObservation`]s.
///
/// Engine startup is asynchronous: until [`PoseAdapter::engine_ready`] is
/// called, `observe` returns `None`, which callers must treat as "no
/// observation this tick" rather than "no face". A failed startup flips the
/// adapter into degraded mode permanently.
pub struct PoseAdapter {
    engine: EngineSlot,
    last_timestamp_ms: Option<i64>,
    last_observation: Option<FrameObservation>,
    detect_failures: u64,
}

impl PoseAdapter {
    /// Adapter waiting for the engine to finish loading.
    pub fn pending() -> Self {
        Self {
            engine: EngineSlot::Initializing,
            last_timestamp_ms: None,
            last_observation: None,
            detect_failures: 0,
        }
    }

    /// Adapter over an engine that is already ready (tests, replay).
    pub fn with_engine(engine: Box<dyn FaceEngine>) -> Self {
        let mut adapter = Self::pending();
        adapter.engine = EngineSlot::Ready(engine);
        adapter
    }

    pub fn engine_ready(&mut self, engine: Box<dyn FaceEngine>) {
        if matches!(self.engine, EngineSlot::Initializing) {
            self.engine = EngineSlot::Ready(engine);
        }
    }

    pub fn engine_failed(&mut self, reason: &str) {
        warn!("face engine unavailable, entering degraded mode: {reason}");
        self.engine = EngineSlot::Degraded;
    }

    pub fn status(&self) -> EngineStatus {
        match self.engine {
            EngineSlot::Initializing => EngineStatus::Initializing,
            EngineSlot::Ready(_) => EngineStatus::Ready,
            EngineSlot::Degraded => EngineStatus::Degraded,
        }
    }

    /// Analyze a frame, deduplicating by frame timestamp: re-invoking on a
    /// frame whose timestamp has not advanced returns the previous result
    /// without running inference again.
    pub fn observe(&mut self, frame: &VideoFrame) -> Option<FrameObservation> {
        let EngineSlot::Ready(engine) = &mut self.engine else {
            return None;
        };

        if self.last_timestamp_ms == Some(frame.timestamp_ms) {
            return self.last_observation;
        }
        self.last_timestamp_ms = Some(frame.timestamp_ms);

        let observation = match engine.detect(frame) {
            Ok(Some(detection)) => Some(observation_from(&detection, frame.timestamp_ms)),
            Ok(None) => Some(FrameObservation::absent(frame.timestamp_ms)),
            Err(err) => {
                self.detect_failures += 1;
                if self.detect_failures % 100 == 1 {
                    warn!(
                        "face detection failed ({} failures so far): {err:#}",
                        self.detect_failures
                    );
                }
                None
            }
        };

        self.last_observation = observation;
        observation
    }
}

fn observation_from(detection: &FaceDetection, timestamp_ms: i64) -> FrameObservation {
    if let Some(transform) = detection.transform {
        return FrameObservation::face(transform.head_pose(), timestamp_ms);
    }
    if let Some(landmarks) = detection.landmarks {
        let pose = HeadPose {
            yaw_degrees: estimate_yaw_degrees(&landmarks),
            pitch_degrees: 0.0,
            roll_degrees: 0.0,
        };
        return FrameObservation::face(pose, timestamp_ms);
    }
    // Face reported with no usable geometry: treat as forward gaze.
    FrameObservation::face(
        HeadPose {
            yaw_degrees: 0.0,
            pitch_degrees: 0.0,
            roll_degrees: 0.0,
        },
        timestamp_ms,
    )
}

/// Ratio-based yaw estimate for engines that expose landmarks but no
/// transformation matrix: the nose offset between the cheeks, scaled to
/// +/-90 degrees. Positive yaw means looking right.
pub fn estimate_yaw_degrees(landmarks: &FaceLandmarks) -> f64 {
    let span = landmarks.right_cheek_x - landmarks.left_cheek_x;
    if span.abs() < f64::EPSILON {
        return 0.0;
    }
    let ratio = (landmarks.nose_x - landmarks.left_cheek_x) / span;
    (ratio * 2.0 - 1.0).clamp(-1.0, 1.0) * 90.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::FaceTransform;
    use anyhow::Result;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingEngine {
        detections: Arc<AtomicU32>,
        result: Option<FaceDetection>,
    }

    impl CountingEngine {
        fn new(result: Option<FaceDetection>) -> (Self, Arc<AtomicU32>) {
            let detections = Arc::new(AtomicU32::new(0));
            (
                Self {
                    detections: detections.clone(),
                    result,
                },
                detections,
            )
        }
    }

    impl FaceEngine for CountingEngine {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<FaceDetection>> {
            self.detections.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct FailingEngine;

    impl FaceEngine for FailingEngine {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<FaceDetection>> {
            anyhow::bail!("inference backend crashed")
        }
    }

    fn frame(timestamp_ms: i64) -> VideoFrame {
        VideoFrame::solid(timestamp_ms, 8, 8, [0, 0, 0])
    }

    fn face_detection(yaw: f64) -> FaceDetection {
        FaceDetection {
            transform: Some(FaceTransform::from_euler_degrees(yaw, 0.0, 0.0)),
            landmarks: None,
        }
    }

    #[test]
    fn returns_none_while_initializing() {
        let mut adapter = PoseAdapter::pending();
        assert_eq!(adapter.status(), EngineStatus::Initializing);
        assert_eq!(adapter.observe(&frame(10)), None);
    }

    #[test]
    fn returns_none_once_degraded() {
        let mut adapter = PoseAdapter::pending();
        adapter.engine_failed("model download failed");
        assert_eq!(adapter.status(), EngineStatus::Degraded);
        assert_eq!(adapter.observe(&frame(10)), None);
    }

    #[test]
    fn degraded_adapter_ignores_late_engine() {
        let mut adapter = PoseAdapter::pending();
        adapter.engine_failed("timeout");
        let (engine, _) = CountingEngine::new(None);
        adapter.engine_ready(Box::new(engine));
        assert_eq!(adapter.status(), EngineStatus::Degraded);
    }

    #[test]
    fn dedupes_by_frame_timestamp() {
        let (engine, detections) = CountingEngine::new(Some(face_detection(-30.0)));
        let mut adapter = PoseAdapter::with_engine(Box::new(engine));

        let first = adapter.observe(&frame(100)).unwrap();
        let repeat = adapter.observe(&frame(100)).unwrap();
        assert_eq!(first, repeat);
        assert_eq!(detections.load(Ordering::SeqCst), 1);

        let advanced = adapter.observe(&frame(133)).unwrap();
        assert_eq!(advanced.timestamp_ms, 133);
        assert_eq!(detections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_face_maps_to_absent_observation() {
        let (engine, _) = CountingEngine::new(None);
        let mut adapter = PoseAdapter::with_engine(Box::new(engine));
        let observation = adapter.observe(&frame(5)).unwrap();
        assert!(!observation.face_present);
    }

    #[test]
    fn detect_errors_yield_no_observation() {
        let mut adapter = PoseAdapter::with_engine(Box::new(FailingEngine));
        assert_eq!(adapter.observe(&frame(5)), None);
        // Cached for the same timestamp as well.
        assert_eq!(adapter.observe(&frame(5)), None);
    }

    #[test]
    fn transform_pose_flows_through() {
        let (engine, _) = CountingEngine::new(Some(face_detection(-30.0)));
        let mut adapter = PoseAdapter::with_engine(Box::new(engine));
        let observation = adapter.observe(&frame(1)).unwrap();
        assert!(observation.face_present);
        assert!((observation.yaw_degrees - -30.0).abs() < 1e-9);
    }

    #[test]
    fn landmark_fallback_estimates_yaw_sign() {
        // Nose near the right cheek means the head is turned right.
        let toward_right = FaceLandmarks {
            nose_x: 0.68,
            left_cheek_x: 0.3,
            right_cheek_x: 0.7,
        };
        assert!(estimate_yaw_degrees(&toward_right) > 25.0);

        let toward_left = FaceLandmarks {
            nose_x: 0.32,
            left_cheek_x: 0.3,
            right_cheek_x: 0.7,
        };
        assert!(estimate_yaw_degrees(&toward_left) < -25.0);

        let centered = FaceLandmarks {
            nose_x: 0.5,
            left_cheek_x: 0.3,
            right_cheek_x: 0.7,
        };
        assert!(estimate_yaw_degrees(&centered).abs() < 1e-9);
    }
}
