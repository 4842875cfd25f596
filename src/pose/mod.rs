//! Frame and head-pose types plus the seams to the camera and the
//! face-landmark inference engine.

pub mod adapter;

pub use adapter::{estimate_yaw_degrees, EngineStatus, PoseAdapter};

use serde::{Deserialize, Serialize};

/// One decoded camera frame. Pixels are tightly packed RGB8, row-major.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl VideoFrame {
    /// Uniformly colored frame, used by the replay driver and tests.
    pub fn solid(timestamp_ms: i64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            timestamp_ms,
            width,
            height,
            pixels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadPose {
    pub yaw_degrees: f64,
    pub pitch_degrees: f64,
    pub roll_degrees: f64,
}

/// Normalized per-frame observation handed to the classifier.
///
/// When `face_present` is false the angle fields are undefined and must not
/// be consulted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameObservation {
    pub face_present: bool,
    pub yaw_degrees: f64,
    pub pitch_degrees: f64,
    pub roll_degrees: f64,
    pub timestamp_ms: i64,
}

impl FrameObservation {
    pub fn face(pose: HeadPose, timestamp_ms: i64) -> Self {
        Self {
            face_present: true,
            yaw_degrees: pose.yaw_degrees,
            pitch_degrees: pose.pitch_degrees,
            roll_degrees: pose.roll_degrees,
            timestamp_ms,
        }
    }

    pub fn absent(timestamp_ms: i64) -> Self {
        Self {
            face_present: false,
            yaw_degrees: 0.0,
            pitch_degrees: 0.0,
            roll_degrees: 0.0,
            timestamp_ms,
        }
    }
}

/// Column-major 4x4 facial transformation matrix as produced by the
/// landmark engine.
#[derive(Debug, Clone, Copy)]
pub struct FaceTransform(pub [f64; 16]);

impl FaceTransform {
    /// Euler angles in degrees extracted from the rotation part.
    pub fn head_pose(&self) -> HeadPose {
        let m = &self.0;
        HeadPose {
            yaw_degrees: m[6].atan2(m[10]).to_degrees(),
            pitch_degrees: (-m[2]).asin().to_degrees(),
            roll_degrees: m[1].atan2(m[0]).to_degrees(),
        }
    }

    /// Inverse of [`FaceTransform::head_pose`], used to script engine output
    /// for replay and tests.
    pub fn from_euler_degrees(yaw: f64, pitch: f64, roll: f64) -> Self {
        let (sa, ca) = yaw.to_radians().sin_cos();
        let (sb, cb) = pitch.to_radians().sin_cos();
        let (sc, cc) = roll.to_radians().sin_cos();

        let mut m = [0.0; 16];
        m[0] = cc * cb;
        m[1] = sc * cb;
        m[2] = -sb;
        m[4] = cc * sb * sa - sc * ca;
        m[5] = sc * sb * sa + cc * ca;
        m[6] = cb * sa;
        m[8] = cc * sb * ca + sc * sa;
        m[9] = sc * sb * ca - cc * sa;
        m[10] = cb * ca;
        m[15] = 1.0;
        Self(m)
    }
}

/// X-coordinates (normalized to [0, 1]) of the landmarks used by the
/// ratio-based gaze fallback.
#[derive(Debug, Clone, Copy)]
pub struct FaceLandmarks {
    pub nose_x: f64,
    pub left_cheek_x: f64,
    pub right_cheek_x: f64,
}

/// Raw engine output for a frame that contains a face.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub transform: Option<FaceTransform>,
    pub landmarks: Option<FaceLandmarks>,
}

/// Black-box face-landmark inference capability.
///
/// `Ok(None)` means the frame was analyzed and no face was found, which is a
/// classifiable condition; errors mean the frame could not be analyzed at all.
pub trait FaceEngine: Send + 'static {
    fn detect(&mut self, frame: &VideoFrame) -> anyhow::Result<Option<FaceDetection>>;
}

/// Camera feed seam polled by the detection loop.
pub trait FrameSource: Send + 'static {
    fn poll_frame(&mut self) -> Option<VideoFrame>;
}
