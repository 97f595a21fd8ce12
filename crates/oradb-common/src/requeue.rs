//! Requeue policy
//!
//! Turns the class of a reconcile error into a phase decision and a
//! requeue delay. Transient classes keep the phase and retry on the short
//! interval. Permanent classes move the resource to Failed and are revisited
//! on the long interval, so a fix in the environment is eventually noticed
//! even without a spec edit. Setting `permanent` to `None` stops periodic
//! revisits and waits for a watch event instead.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::conditions::ReconcileOutcome;
use crate::error::{Error, ErrorClass};

/// Requeue intervals
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Delay for transient errors and "not ready yet"
    pub transient: Duration,
    /// Delay for permanently failed resources; `None` waits for a change
    pub permanent: Option<Duration>,
    /// Status refresh interval for converged resources
    pub ready: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            transient: Duration::from_secs(15),
            permanent: Some(Duration::from_secs(300)),
            ready: Duration::from_secs(60),
        }
    }
}

/// What the engine does with a phase-local error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the current phase and retry
    Retry {
        /// Error class that led here
        class: ErrorClass,
        /// Requeue delay
        after: Duration,
    },
    /// Move to Failed and emit a warning
    Fail {
        /// Error class that led here
        class: ErrorClass,
        /// Requeue delay, `None` to wait for a change
        after: Option<Duration>,
    },
}

impl Disposition {
    /// True when the resource moves to Failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    /// Controller action for this disposition
    pub fn action(&self) -> Action {
        match self {
            Self::Retry { after, .. } => Action::requeue(*after),
            Self::Fail { after: Some(after), .. } => Action::requeue(*after),
            Self::Fail { after: None, .. } => Action::await_change(),
        }
    }

    /// Condition outcome to report
    pub fn outcome(&self) -> ReconcileOutcome {
        match self {
            Self::Retry {
                class: ErrorClass::NotFound,
                ..
            } => ReconcileOutcome::Blocked,
            Self::Retry { .. } => ReconcileOutcome::Queued,
            Self::Fail { .. } => ReconcileOutcome::Error,
        }
    }
}

impl RequeuePolicy {
    /// Decide what to do with an error returned by a phase handler
    pub fn disposition(&self, error: &Error) -> Disposition {
        let class = error.class();
        match class {
            ErrorClass::TransientInfra | ErrorClass::NotFound => Disposition::Retry {
                class,
                after: self.transient,
            },
            ErrorClass::ExternalService | ErrorClass::Domain | ErrorClass::Spec => {
                Disposition::Fail {
                    class,
                    after: self.permanent,
                }
            }
        }
    }

    /// Action for "not done yet, check again soon"
    pub fn waiting(&self) -> Action {
        Action::requeue(self.transient)
    }

    /// Action for a converged resource
    pub fn ready(&self) -> Action {
        Action::requeue(self.ready)
    }
}
