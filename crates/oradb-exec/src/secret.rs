//! Short-lived secret files
//!
//! Broker CLIs only take passwords on stdin or from a prompt, so the
//! password is written to a file on the pod for the duration of one
//! operation. Every call gets its own path, and the file is removed on
//! every exit path.

use std::future::Future;

use rand::Rng;
use tracing::warn;

use crate::command::Command;
use crate::error::ExecError;
use crate::executor::{run, PodExecutor, PodRef};

/// Directory and name prefix of secret files on the pod
pub const SECRET_FILE_PREFIX: &str = "/tmp/.oradb-";

/// Fresh pod-local path for one secret file
pub fn secret_file_path() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{SECRET_FILE_PREFIX}{suffix:016x}.pwd")
}

/// Write `secret` to a fresh file on `pod`, run `f` with its path, then
/// remove the file.
///
/// Removal runs whether `f` succeeds, returns a domain error or fails at the
/// transport layer, and also when the write itself failed partway. The
/// error from `f` wins over a removal error.
pub async fn with_secret_file<F, Fut, T>(
    executor: &dyn PodExecutor,
    pod: &PodRef,
    secret: &str,
    f: F,
) -> Result<T, ExecError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    let path = secret_file_path();
    let result = match run(executor, pod, &Command::write_secret_file(path.clone(), secret)).await {
        Ok(_) => f(path.clone()).await,
        Err(e) => Err(e),
    };

    let cleanup = run(executor, pod, &Command::remove_file(path.clone())).await;

    match (result, cleanup) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(pod = %pod, path = %path, error = %cleanup_err, "failed to remove secret file");
            Err(e)
        }
    }
}
