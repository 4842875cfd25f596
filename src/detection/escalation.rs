use std::sync::Arc;

use anyhow::{Context, Result};

use super::ViolationKind;
use crate::storage::{self, AttemptStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub count: u32,
    pub threshold_crossed: bool,
}

/// Durable per-attempt violation counter.
///
/// Only tab switches escalate toward forced submission; pose violations are
/// relayed as alerts but never increment this counter. The count lives in
/// the attempt store so it survives page loads, and stops moving once the
/// force-submit flag has been armed.
pub struct EscalationCounter {
    store: Arc<dyn AttemptStore>,
    max_switches: u32,
}

impl EscalationCounter {
    pub fn new(store: Arc<dyn AttemptStore>, max_switches: u32) -> Self {
        Self {
            store,
            max_switches,
        }
    }

    pub fn count(&self, attempt_id: &str) -> u32 {
        self.store
            .get(&storage::tab_switch_count_key(attempt_id))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    pub fn record(&self, attempt_id: &str, kind: ViolationKind) -> Result<Escalation> {
        let count = self.count(attempt_id);

        if kind != ViolationKind::TabSwitch {
            return Ok(Escalation {
                count,
                threshold_crossed: false,
            });
        }

        let armed = self
            .store
            .get(&storage::force_submit_key(attempt_id))
            .as_deref()
            == Some("1");
        if armed {
            // Forced submission is already in flight; crossing fires once.
            return Ok(Escalation {
                count,
                threshold_crossed: false,
            });
        }

        let count = count + 1;
        self.store
            .set(&storage::tab_switch_count_key(attempt_id), &count.to_string())
            .context("failed to persist tab switch count")?;

        Ok(Escalation {
            count,
            threshold_crossed: count == self.max_switches,
        })
    }

    pub fn clear(&self, attempt_id: &str) -> Result<()> {
        self.store
            .remove(&storage::tab_switch_count_key(attempt_id))
            .context("failed to clear tab switch count")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAttemptStore;

    fn counter(max: u32) -> EscalationCounter {
        EscalationCounter::new(Arc::new(MemoryAttemptStore::new()), max)
    }

    #[test]
    fn pose_violations_never_escalate() {
        let counter = counter(3);
        for kind in [
            ViolationKind::LookingLeft,
            ViolationKind::LookingRight,
            ViolationKind::NoFace,
        ] {
            let escalation = counter.record("a1", kind).unwrap();
            assert_eq!(escalation.count, 0);
            assert!(!escalation.threshold_crossed);
        }
        assert_eq!(counter.count("a1"), 0);
    }

    #[test]
    fn threshold_crossed_exactly_on_max() {
        let counter = counter(3);
        let first = counter.record("a1", ViolationKind::TabSwitch).unwrap();
        assert_eq!((first.count, first.threshold_crossed), (1, false));
        let second = counter.record("a1", ViolationKind::TabSwitch).unwrap();
        assert_eq!((second.count, second.threshold_crossed), (2, false));
        let third = counter.record("a1", ViolationKind::TabSwitch).unwrap();
        assert_eq!((third.count, third.threshold_crossed), (3, true));
    }

    #[test]
    fn count_is_monotonic_and_crossing_is_single() {
        let counter = counter(2);
        let mut crossings = 0;
        let mut previous = 0;
        for _ in 0..5 {
            let escalation = counter.record("a1", ViolationKind::TabSwitch).unwrap();
            assert!(escalation.count >= previous);
            previous = escalation.count;
            if escalation.threshold_crossed {
                crossings += 1;
            }
        }
        assert_eq!(crossings, 1);
    }

    #[test]
    fn armed_flag_short_circuits_counting() {
        let store = Arc::new(MemoryAttemptStore::new());
        let counter = EscalationCounter::new(store.clone(), 3);
        counter.record("a1", ViolationKind::TabSwitch).unwrap();
        store
            .set(&storage::force_submit_key("a1"), "1")
            .unwrap();

        let escalation = counter.record("a1", ViolationKind::TabSwitch).unwrap();
        assert_eq!(escalation.count, 1);
        assert!(!escalation.threshold_crossed);
        assert_eq!(counter.count("a1"), 1);
    }

    #[test]
    fn counts_are_scoped_per_attempt() {
        let counter = counter(3);
        counter.record("a1", ViolationKind::TabSwitch).unwrap();
        assert_eq!(counter.count("a1"), 1);
        assert_eq!(counter.count("a2"), 0);
    }

    #[test]
    fn clear_resets_the_counter() {
        let counter = counter(3);
        counter.record("a1", ViolationKind::TabSwitch).unwrap();
        counter.clear("a1").unwrap();
        assert_eq!(counter.count("a1"), 0);
    }
}
