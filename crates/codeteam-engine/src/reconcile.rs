//! Pure phase derivation. No reads, no writes, no clock — everything the
//! decision needs is in the snapshot, so two calls over the same snapshot
//! always agree and trigger nothing.

use crate::signals::ExternalSignals;
use codeteam_core::{Decision, Phase};

/// Map observable external state to the current workflow phase.
/// First-match priority order; see the rule comments.
#[must_use]
pub fn reconcile(signals: &ExternalSignals) -> Phase {
    // 1. No plan document: nothing to orchestrate.
    let Some(plan) = &signals.plan else {
        return Phase::NoPlan;
    };

    // 2. A plan exists but the user has not accepted it.
    if !plan.accepted {
        return Phase::AwaitingPlanAcceptance;
    }

    // 3. Every task completed.
    if plan.is_complete() {
        return Phase::PlanComplete;
    }

    // 4./5. A recorded human decision dictates the next step: accept goes
    // to commit, reject routes back through the coder with feedback.
    match &signals.decision {
        Some(Decision::Accept) => return Phase::ReadyToCommit,
        Some(Decision::Reject { .. }) => return Phase::ReadyToStartTask,
        Some(Decision::Defer) | None => {}
    }

    // 6. Verification already ran against this exact tree and no decision
    // has been recorded yet.
    if signals.transcript_chars.is_some() && signals.report_is_current() {
        return Phase::AwaitingHumanReview;
    }

    if signals.transcript_chars.is_some() {
        // 7. Coding is underway: rejection feedback awaits a coder re-run,
        // no coder round has completed yet, or the tree is still clean
        // (nothing to verify). Verification never runs before the coder
        // call for this task has finished.
        if signals.feedback_pending || !signals.coder_replied || !signals.tree_dirty {
            return Phase::TaskInProgress;
        }
        // 8. The coder produced changes that have not been verified.
        return Phase::AwaitingVerification;
    }

    // 9. No task armed yet.
    Phase::ReadyToStartTask
}
