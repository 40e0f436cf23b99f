//! Size-triggered transcript compaction policy.
//!
//! Purely a growth bound, not content-aware: the manager signals `Compact`
//! exactly once per threshold crossing and stays latched until the
//! orchestrator confirms compaction with [`ContextBoundManager::reset`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAction {
    Continue,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ContextBoundManager {
    threshold: u64,
    baseline: u64,
    pending: bool,
}

impl ContextBoundManager {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            baseline: 0,
            pending: false,
        }
    }

    /// Observe the current transcript size. Growth is measured from the
    /// post-compaction baseline; once `Compact` has been signaled, further
    /// observations return `Continue` until `reset` re-arms the manager.
    pub fn observe(&mut self, size: u64) -> ContextAction {
        if self.pending {
            return ContextAction::Continue;
        }
        if size.saturating_sub(self.baseline) > self.threshold {
            self.pending = true;
            return ContextAction::Compact;
        }
        ContextAction::Continue
    }

    /// Confirm that compaction happened, with the size of the condensed
    /// transcript as the new growth baseline.
    pub fn reset(&mut self, compacted_size: u64) {
        self.baseline = compacted_size;
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_the_threshold_fires_exactly_once() {
        let mut mgr = ContextBoundManager::new(1000);
        assert_eq!(mgr.observe(900), ContextAction::Continue);
        assert_eq!(mgr.observe(1100), ContextAction::Compact);
        // Latched: still above threshold, but already signaled.
        assert_eq!(mgr.observe(1200), ContextAction::Continue);
    }

    #[test]
    fn post_reset_observation_below_new_bound_does_not_retrigger() {
        let mut mgr = ContextBoundManager::new(1000);
        assert_eq!(mgr.observe(1100), ContextAction::Compact);
        mgr.reset(80); // condensed summary size
        assert_eq!(mgr.observe(1050), ContextAction::Continue);
        // Growth from the new baseline crosses the bound again.
        assert_eq!(mgr.observe(1090), ContextAction::Compact);
    }

    #[test]
    fn exact_threshold_does_not_fire() {
        let mut mgr = ContextBoundManager::new(1000);
        assert_eq!(mgr.observe(1000), ContextAction::Continue);
        assert_eq!(mgr.observe(1001), ContextAction::Compact);
    }
}
