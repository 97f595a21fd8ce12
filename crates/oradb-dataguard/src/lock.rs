//! Paired marker lock for role changes
//!
//! The two databases taking part in a switchover are the only place both
//! sides can see, so the lock is a marker file on each of them. It is taken
//! on the primary first and then on the standby. If the standby cannot be
//! taken the primary is released and nothing else happens.

use std::future::Future;

use tracing::{debug, warn};

use oradb_exec::{ExecError, MarkerLock, PodExecutor, PodRef};

/// Take the marker on both pods or on neither
pub async fn lock_pair(
    executor: &dyn PodExecutor,
    lock: &MarkerLock,
    primary: &PodRef,
    standby: &PodRef,
) -> Result<(), ExecError> {
    lock.acquire(executor, primary).await?;
    if let Err(e) = lock.acquire(executor, standby).await {
        if let Err(release_err) = lock.release(executor, primary).await {
            warn!(pod = %primary, error = %release_err, "failed to release marker after partial lock");
        }
        return Err(e);
    }
    debug!(%primary, %standby, owner = lock.owner(), "pair locked");
    Ok(())
}

/// Remove the marker from both pods. Both removals are attempted; the first
/// failure is returned.
pub async fn unlock_pair(
    executor: &dyn PodExecutor,
    lock: &MarkerLock,
    primary: &PodRef,
    standby: &PodRef,
) -> Result<(), ExecError> {
    let first = lock.release(executor, primary).await;
    let second = lock.release(executor, standby).await;
    first.and(second)
}

/// Hold the pair lock while `f` runs.
///
/// Both markers are removed on every exit path once taken. The error from
/// `f` wins over a release error.
pub async fn with_pair_lock<F, Fut, T>(
    executor: &dyn PodExecutor,
    lock: &MarkerLock,
    primary: &PodRef,
    standby: &PodRef,
    f: F,
) -> Result<T, ExecError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    lock_pair(executor, lock, primary, standby).await?;
    let result = f().await;
    let released = unlock_pair(executor, lock, primary, standby).await;

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "failed to release markers");
            Err(e)
        }
    }
}
