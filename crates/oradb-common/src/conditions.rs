//! Reconcile condition reporting
//!
//! Every managed resource carries at most one reconcile condition at a
//! time, one of [`RECONCILE_COMPLETE`], [`RECONCILE_QUEUED`],
//! [`RECONCILE_BLOCKED`] or [`RECONCILE_ERROR`]. Setting a condition that
//! already holds is a no-op so repeated passes over a converged resource
//! leave status untouched. Anything else removes the old entry and inserts a
//! fresh one, which keeps `lastTransitionTime` accurate.

use crate::crd::{Condition, ConditionStatus};

/// Last pass converged
pub const RECONCILE_COMPLETE: &str = "ReconcileComplete";
/// Last pass is waiting on something that will resolve by itself
pub const RECONCILE_QUEUED: &str = "ReconcileQueued";
/// Last pass is waiting on a missing dependency
pub const RECONCILE_BLOCKED: &str = "ReconcileBlocked";
/// Last pass failed permanently
pub const RECONCILE_ERROR: &str = "ReconcileError";

/// Reason paired with [`RECONCILE_COMPLETE`]
pub const REASON_COMPLETED: &str = "LastReconcileCycleCompleted";
/// Reason paired with [`RECONCILE_QUEUED`]
pub const REASON_QUEUED: &str = "LastReconcileCycleQueued";
/// Reason paired with [`RECONCILE_BLOCKED`]
pub const REASON_BLOCKED: &str = "LastReconcileCycleBlocked";
/// Reason paired with [`RECONCILE_ERROR`]
pub const REASON_FAILED: &str = "LastReconcileCycleFailed";

const RECONCILE_TYPES: [&str; 4] = [
    RECONCILE_COMPLETE,
    RECONCILE_QUEUED,
    RECONCILE_BLOCKED,
    RECONCILE_ERROR,
];

/// How a reconcile pass ended, as far as the user is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged
    Complete,
    /// Retrying on the short interval
    Queued,
    /// Waiting on a missing dependency
    Blocked,
    /// Failed permanently
    Error,
}

impl ReconcileOutcome {
    /// Condition type for this outcome
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::Complete => RECONCILE_COMPLETE,
            Self::Queued => RECONCILE_QUEUED,
            Self::Blocked => RECONCILE_BLOCKED,
            Self::Error => RECONCILE_ERROR,
        }
    }

    /// Condition reason for this outcome
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Complete => REASON_COMPLETED,
            Self::Queued => REASON_QUEUED,
            Self::Blocked => REASON_BLOCKED,
            Self::Error => REASON_FAILED,
        }
    }

    fn status(&self) -> ConditionStatus {
        match self {
            Self::Complete => ConditionStatus::True,
            _ => ConditionStatus::False,
        }
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Set `condition`, replacing any condition of the same type.
///
/// Returns false and leaves the list untouched when an identical condition
/// (ignoring timestamp) is already present.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    if find_condition(conditions, &condition.type_).is_some_and(|c| c.same_state(&condition)) {
        return false;
    }
    conditions.retain(|c| c.type_ != condition.type_);
    conditions.push(condition);
    true
}

/// Record the outcome of a reconcile pass.
///
/// Other reconcile condition types are removed so only one is ever active.
pub fn set_reconcile_condition(
    conditions: &mut Vec<Condition>,
    outcome: ReconcileOutcome,
    message: impl Into<String>,
    generation: Option<i64>,
) -> bool {
    let condition = Condition::new(
        outcome.condition_type(),
        outcome.status(),
        outcome.reason(),
        message,
    )
    .with_observed_generation(generation);

    let before = conditions.len();
    conditions.retain(|c| c.type_ == condition.type_ || !RECONCILE_TYPES.contains(&c.type_.as_str()));
    let removed = conditions.len() != before;

    set_condition(conditions, condition) || removed
}
