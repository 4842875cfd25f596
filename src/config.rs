use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Whether the relay cooldown is shared across violation kinds or tracked
/// separately per kind. The reference deployment uses a single shared stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CooldownScope {
    Global,
    PerKind,
}

/// Tunable thresholds for the proctoring engine with defaults matching the
/// reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProctorConfig {
    /// Yaw below this (degrees) counts as looking left.
    pub left_threshold_degrees: f64,
    /// Yaw above this (degrees) counts as looking right.
    pub right_threshold_degrees: f64,
    /// Minimum spacing between alerts relayed to the server.
    pub relay_cooldown_ms: i64,
    /// Minimum spacing between on-screen warning banners.
    pub display_cooldown_ms: i64,
    pub cooldown_scope: CooldownScope,
    /// Tab switches tolerated before the attempt is force-submitted.
    pub max_tab_switches: u32,
    /// Interval of the anti-tamper re-assertion task.
    pub tamper_check_interval_ms: u64,
    /// Interval at which the detection loop polls the frame source.
    pub frame_poll_interval_ms: u64,
    pub screenshot_jpeg_quality: u8,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            left_threshold_degrees: -25.0,
            right_threshold_degrees: 25.0,
            relay_cooldown_ms: 500,
            display_cooldown_ms: 3000,
            cooldown_scope: CooldownScope::Global,
            max_tab_switches: 3,
            tamper_check_interval_ms: 500,
            frame_poll_interval_ms: 33,
            screenshot_jpeg_quality: 70,
        }
    }
}

impl ProctorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: ProctorConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.left_threshold_degrees >= self.right_threshold_degrees {
            bail!(
                "leftThresholdDegrees ({}) must be below rightThresholdDegrees ({})",
                self.left_threshold_degrees,
                self.right_threshold_degrees
            );
        }
        if self.relay_cooldown_ms < 0 || self.display_cooldown_ms < 0 {
            bail!("cooldown durations must not be negative");
        }
        if self.max_tab_switches == 0 {
            bail!("maxTabSwitches must be at least 1");
        }
        if self.screenshot_jpeg_quality == 0 || self.screenshot_jpeg_quality > 100 {
            bail!(
                "screenshotJpegQuality must be within 1..=100, got {}",
                self.screenshot_jpeg_quality
            );
        }
        if self.frame_poll_interval_ms == 0 || self.tamper_check_interval_ms == 0 {
            bail!("poll intervals must be greater than zero");
        }
        Ok(())
    }
}
