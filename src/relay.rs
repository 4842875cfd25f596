//! Fire-and-forget alert delivery.
//!
//! Exactly one dispatch per admitted violation. The detection loop never
//! awaits a dispatch; failures are logged and never retried, so relay
//! latency cannot stall frame processing.

use anyhow::{Context, Result};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use log::error;

use crate::db::Database;
use crate::detection::ViolationSignal;
use crate::models::NewAlert;
use crate::pose::VideoFrame;

pub struct AlertRelay {
    db: Database,
    session_id: String,
    user_id: i64,
    jpeg_quality: u8,
}

impl AlertRelay {
    pub fn new(db: Database, session_id: String, user_id: i64, jpeg_quality: u8) -> Self {
        Self {
            db,
            session_id,
            user_id,
            jpeg_quality,
        }
    }

    /// Serialize the violation into a wire alert and hand it off. Tab-switch
    /// alerts never carry a frame; for the rest the supplied frame is
    /// JPEG-encoded off the loop thread and attached as base64.
    pub fn dispatch(&self, signal: &ViolationSignal, frame: Option<&VideoFrame>) {
        let frame = if signal.kind.captures_screenshot() {
            frame.cloned()
        } else {
            None
        };

        let mut alert = NewAlert {
            session_id: self.session_id.clone(),
            user_id: self.user_id,
            alert_type: signal.kind.as_str().to_string(),
            description: signal.description.clone(),
            screenshot: None,
            severity: signal.severity,
        };

        let db = self.db.clone();
        let quality = self.jpeg_quality;
        tokio::spawn(async move {
            if let Some(frame) = frame {
                match tokio::task::spawn_blocking(move || encode_screenshot(&frame, quality)).await
                {
                    Ok(Ok(data_uri)) => alert.screenshot = Some(data_uri),
                    Ok(Err(err)) => error!("screenshot encode failed: {err:#}"),
                    Err(err) => error!("screenshot encode worker join failed: {err}"),
                }
            }

            if let Err(err) = db.log_alert(alert).await {
                error!("failed to relay alert: {err:#}");
            }
        });
    }
}

/// Encode an RGB frame as a base64 JPEG data URI.
pub fn encode_screenshot(frame: &VideoFrame, quality: u8) -> Result<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("failed to encode frame as JPEG")?;

    Ok(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_jpeg_data_uri() {
        let frame = VideoFrame::solid(0, 16, 12, [120, 80, 40]);
        let data_uri = encode_screenshot(&frame, 70).unwrap();
        let payload = data_uri
            .strip_prefix("data:image/jpeg;base64,")
            .expect("data URI prefix");

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        // JPEG SOI marker.
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn rejects_truncated_pixel_buffers() {
        let frame = VideoFrame {
            timestamp_ms: 0,
            width: 16,
            height: 12,
            pixels: vec![0; 10],
        };
        assert!(encode_screenshot(&frame, 70).is_err());
    }
}
