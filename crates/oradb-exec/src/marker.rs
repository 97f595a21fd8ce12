//! Marker file used as an advisory lock
//!
//! The readiness probe treats the marker as "expected downtime", so holding
//! it keeps a pod in rotation while its instance is bounced. The same file
//! serializes role changes. Contents are `<owner> <unix-seconds>`; a marker
//! older than the TTL is considered abandoned.
//!
//! Every step is one command that checks and writes under the pod-side lock
//! file: create only if absent, replace only if unchanged since it was read,
//! remove only if still owned. Two owners racing for one pod therefore never
//! both win, and neither can drop the other's marker.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::command::{Command, MARKER_TAKEN};
use crate::error::ExecError;
use crate::executor::{run, PodExecutor, PodRef};

/// Current holder of a marker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerHolder {
    /// Owner string written at creation
    pub owner: String,
    /// Creation time, unix seconds
    pub since: i64,
}

impl MarkerHolder {
    /// Parse marker file contents. Empty output means no marker.
    ///
    /// A marker touched by something other than this operator has no owner
    /// or timestamp; it parses with `since = 0` and is therefore stale.
    pub fn parse(contents: &str) -> Option<Self> {
        let line = contents.lines().map(str::trim).find(|l| !l.is_empty())?;
        let (owner, since) = match line.rsplit_once(' ') {
            Some((owner, ts)) => match ts.parse() {
                Ok(since) => (owner.trim().to_string(), since),
                Err(_) => (line.to_string(), 0),
            },
            None => (line.to_string(), 0),
        };
        Some(Self { owner, since })
    }

    /// True when this marker keeps `owner` out at time `now`
    pub fn blocks(&self, owner: &str, ttl: Duration, now: i64) -> bool {
        if self.owner == owner {
            return false;
        }
        let age = now.saturating_sub(self.since);
        age >= 0 && (age as u64) < ttl.as_secs()
    }
}

/// Marker lock held on behalf of one owner
#[derive(Clone, Debug)]
pub struct MarkerLock {
    owner: String,
    ttl: Duration,
}

impl MarkerLock {
    /// Lock identity for `owner`, e.g. `prod/dg-broker`
    pub fn new(owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            owner: owner.into(),
            ttl,
        }
    }

    /// Owner string written into the marker
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Take the marker on `pod`.
    ///
    /// Returns `Ok(false)` when a fresh marker owned by someone else exists,
    /// or when another owner changed the marker between the two steps.
    /// Stale and self-owned markers are replaced.
    pub async fn try_acquire(
        &self,
        executor: &dyn PodExecutor,
        pod: &PodRef,
    ) -> Result<bool, ExecError> {
        let create = Command::CreateMarker {
            owner: self.owner.clone(),
        };
        let current = match marker_reply(&run(executor, pod, &create).await?.stdout) {
            None => return Ok(true),
            Some(current) => current,
        };

        if let Some(holder) = MarkerHolder::parse(&current) {
            let now = chrono::Utc::now().timestamp();
            if holder.blocks(&self.owner, self.ttl, now) {
                debug!(pod = %pod, holder = %holder.owner, "marker held");
                return Ok(false);
            }
            if holder.owner != self.owner {
                warn!(pod = %pod, holder = %holder.owner, "replacing stale marker");
            }
        }

        let replace = Command::ReplaceMarker {
            owner: self.owner.clone(),
            expected: current,
        };
        match marker_reply(&run(executor, pod, &replace).await?.stdout) {
            None => Ok(true),
            Some(now_held) => {
                debug!(pod = %pod, marker = %now_held.trim(), "marker changed before replacement");
                Ok(false)
            }
        }
    }

    /// Take the marker or fail with [`ExecError::Locked`]
    pub async fn acquire(&self, executor: &dyn PodExecutor, pod: &PodRef) -> Result<(), ExecError> {
        if self.try_acquire(executor, pod).await? {
            Ok(())
        } else {
            Err(ExecError::Locked {
                pod: pod.to_string(),
            })
        }
    }

    /// Remove the marker on `pod` if this owner still holds it.
    ///
    /// A marker taken over by someone else is left alone.
    pub async fn release(&self, executor: &dyn PodExecutor, pod: &PodRef) -> Result<(), ExecError> {
        let remove = Command::RemoveMarker {
            owner: self.owner.clone(),
        };
        let out = run(executor, pod, &remove).await?;
        let held = out.stdout.trim();
        if !held.is_empty() {
            warn!(pod = %pod, marker = %held, "marker no longer ours, left in place");
        }
        Ok(())
    }
}

/// `None` when a marker command took the marker, else the marker contents
/// it found, trailing newlines stripped
fn marker_reply(stdout: &str) -> Option<String> {
    if stdout.lines().any(|l| l.trim() == MARKER_TAKEN) {
        return None;
    }
    Some(stdout.trim_end_matches('\n').to_string())
}

/// Hold the marker on `pod` while `f` runs. The marker is removed on every
/// exit path once it was taken.
pub async fn with_marker<F, Fut, T>(
    executor: &dyn PodExecutor,
    pod: &PodRef,
    lock: &MarkerLock,
    f: F,
) -> Result<T, ExecError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    lock.acquire(executor, pod).await?;
    let result = f().await;
    let released = lock.release(executor, pod).await;

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(pod = %pod, error = %release_err, "failed to remove marker");
            Err(e)
        }
    }
}
