use std::collections::HashMap;

use super::ViolationKind;
use crate::config::CooldownScope;

/// Rate limit between admitted signals, decoupling alert volume from the
/// 30-60 Hz frame rate. Time comes from the caller (frame or event
/// timestamps), not the wall clock, so the gate is deterministic under test.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown_ms: i64,
    scope: CooldownScope,
    last_global_ms: Option<i64>,
    last_by_kind_ms: HashMap<ViolationKind, i64>,
}

impl CooldownGate {
    pub fn new(cooldown_ms: i64, scope: CooldownScope) -> Self {
        Self {
            cooldown_ms,
            scope,
            last_global_ms: None,
            last_by_kind_ms: HashMap::new(),
        }
    }

    pub fn global(cooldown_ms: i64) -> Self {
        Self::new(cooldown_ms, CooldownScope::Global)
    }

    pub fn per_kind(cooldown_ms: i64) -> Self {
        Self::new(cooldown_ms, CooldownScope::PerKind)
    }

    /// True iff at least `cooldown_ms` elapsed since the last admitted
    /// signal in scope; admitting updates the stamp.
    pub fn admit(&mut self, kind: ViolationKind, now_ms: i64) -> bool {
        let last = match self.scope {
            CooldownScope::Global => self.last_global_ms,
            CooldownScope::PerKind => self.last_by_kind_ms.get(&kind).copied(),
        };

        if let Some(last_ms) = last {
            if now_ms - last_ms < self.cooldown_ms {
                return false;
            }
        }

        match self.scope {
            CooldownScope::Global => self.last_global_ms = Some(now_ms),
            CooldownScope::PerKind => {
                self.last_by_kind_ms.insert(kind, now_ms);
            }
        }
        true
    }

    /// Forget all stamps; used when a monitoring session ends.
    pub fn reset(&mut self) {
        self.last_global_ms = None;
        self.last_by_kind_ms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_first_rejects_inside_window_admits_after() {
        let mut gate = CooldownGate::global(500);
        assert!(gate.admit(ViolationKind::LookingLeft, 1000));
        assert!(!gate.admit(ViolationKind::LookingLeft, 1100));
        assert!(gate.admit(ViolationKind::LookingLeft, 1500));
    }

    #[test]
    fn global_scope_spans_kinds() {
        let mut gate = CooldownGate::global(500);
        assert!(gate.admit(ViolationKind::LookingLeft, 1000));
        assert!(!gate.admit(ViolationKind::NoFace, 1200));
    }

    #[test]
    fn per_kind_scope_tracks_independently() {
        let mut gate = CooldownGate::per_kind(500);
        assert!(gate.admit(ViolationKind::LookingLeft, 1000));
        assert!(gate.admit(ViolationKind::NoFace, 1200));
        assert!(!gate.admit(ViolationKind::LookingLeft, 1300));
    }

    #[test]
    fn reset_forgets_stamps() {
        let mut gate = CooldownGate::global(500);
        assert!(gate.admit(ViolationKind::TabSwitch, 1000));
        gate.reset();
        assert!(gate.admit(ViolationKind::TabSwitch, 1001));
    }
}
