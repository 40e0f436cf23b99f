//! The external-signal snapshot. Assembled fresh on every reconciliation
//! pass and never persisted — this is the statelessness invariant:
//! phase = f(signals), with f pure.

use codeteam_core::{Decision, Plan};

#[derive(Debug, Clone)]
pub struct ExternalSignals {
    /// Active plan document, statuses included. `None` when no plan exists.
    pub plan: Option<Plan>,
    /// Uncommitted working-tree changes present.
    pub tree_dirty: bool,
    /// Digest of the current working-tree diff + status.
    pub tree_digest: String,
    /// Task the workflow is currently pointed at: the in-progress task,
    /// else the next eligible one.
    pub active_task_id: Option<String>,
    /// Size of the active task's transcript; `None` when no transcript.
    pub transcript_chars: Option<u64>,
    /// At least one coder round has completed for the active task.
    /// Verification is never scheduled before this holds.
    pub coder_replied: bool,
    /// Digest stamped into the active task's persisted verification
    /// report, when one exists.
    pub report_digest: Option<String>,
    /// Unconsumed rejection feedback awaiting a coder re-run.
    pub feedback_pending: bool,
    /// Unconsumed human decision marker for the active task.
    pub decision: Option<Decision>,
}

impl ExternalSignals {
    /// The persisted verification report covers the tree as it stands now.
    #[must_use]
    pub fn report_is_current(&self) -> bool {
        self.report_digest.as_deref() == Some(self.tree_digest.as_str())
    }
}
