pub mod classifier;
pub mod cooldown;
pub mod escalation;

pub use classifier::{classify, classify_visibility, GazeThresholds};
pub use cooldown::CooldownGate;
pub use escalation::{Escalation, EscalationCounter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    LookingLeft,
    LookingRight,
    NoFace,
    TabSwitch,
}

impl ViolationKind {
    /// Wire name used in alert rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::LookingLeft => "looking_left",
            ViolationKind::LookingRight => "looking_right",
            ViolationKind::NoFace => "missing_face",
            ViolationKind::TabSwitch => "tab_switch",
        }
    }

    pub fn severity(&self) -> i64 {
        match self {
            ViolationKind::LookingLeft | ViolationKind::LookingRight => 2,
            ViolationKind::NoFace => 2,
            ViolationKind::TabSwitch => 3,
        }
    }

    /// No camera frame is meaningful for a tab switch, so its alerts carry
    /// no screenshot.
    pub fn captures_screenshot(&self) -> bool {
        !matches!(self, ViolationKind::TabSwitch)
    }
}

/// A single detected violation, produced by the classifier and consumed by
/// the cooldown gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationSignal {
    pub kind: ViolationKind,
    pub severity: i64,
    pub description: String,
    pub occurred_at_ms: i64,
}

impl ViolationSignal {
    pub fn new(kind: ViolationKind, description: String, occurred_at_ms: i64) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            description,
            occurred_at_ms,
        }
    }
}
