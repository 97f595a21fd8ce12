//! Command transport over the Kubernetes exec API

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::command::Command;
use crate::error::ExecError;
use crate::output::CommandOutput;

/// Default upper bound on a single command; datapatch is the slowest caller
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(600);

/// Container running the database in every pod this operator creates
pub const DATABASE_CONTAINER: &str = "oracle";

/// A pod to run commands in
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodRef {
    /// Namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodRef {
    /// Reference a pod
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Runs commands inside pods.
///
/// `Err` means the transport failed or the command exited non-zero. An `Ok`
/// output can still carry a vendor error; use [`run`] to check both.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodExecutor: Send + Sync {
    /// Run `command` in `pod` and collect its output
    async fn exec(&self, pod: &PodRef, command: &Command) -> Result<CommandOutput, ExecError>;
}

/// Run a command and fail on either error channel.
///
/// Bootstrap-signal codes are not treated as failures; callers that care
/// check [`CommandOutput::has_code`].
pub async fn run(
    executor: &dyn PodExecutor,
    pod: &PodRef,
    command: &Command,
) -> Result<CommandOutput, ExecError> {
    let output = executor.exec(pod, command).await?;
    if let Some((code, line)) = output.first_domain_error() {
        warn!(pod = %pod, command = %command.redacted(), %code, "database reported an error");
        return Err(ExecError::Domain {
            pod: pod.to_string(),
            code,
            line,
        });
    }
    Ok(output)
}

/// [`PodExecutor`] backed by `pods/exec`
pub struct KubePodExecutor {
    client: Client,
    container: String,
    timeout: Duration,
}

impl KubePodExecutor {
    /// Executor targeting the database container
    pub fn new(client: Client) -> Self {
        Self {
            client,
            container: DATABASE_CONTAINER.to_string(),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    async fn exec_inner(&self, pod: &PodRef, command: &Command) -> Result<CommandOutput, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let input = command.stdin();
        let params = AttachParams::default()
            .container(self.container.clone())
            .stdin(input.is_some())
            .stdout(true)
            .stderr(true);

        let mut attached = pods
            .exec(&pod.name, command.argv(), &params)
            .await
            .map_err(|e| ExecError::transport(pod.to_string(), e.to_string()))?;

        if let Some(input) = input {
            let mut writer = attached
                .stdin()
                .ok_or_else(|| ExecError::transport(pod.to_string(), "stdin not attached"))?;
            writer
                .write_all(input.as_bytes())
                .await
                .map_err(|e| ExecError::transport(pod.to_string(), format!("writing input: {e}")))?;
            writer
                .shutdown()
                .await
                .map_err(|e| ExecError::transport(pod.to_string(), format!("closing input: {e}")))?;
        }

        let mut stdout = String::new();
        let mut stderr = String::new();
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();

        let read_stdout = async {
            if let Some(mut r) = stdout_reader {
                r.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            if let Some(mut r) = stderr_reader {
                r.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        tokio::try_join!(read_stdout, read_stderr)
            .map_err(|e| ExecError::transport(pod.to_string(), format!("reading output: {e}")))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| ExecError::transport(pod.to_string(), e.to_string()))?;

        let output = CommandOutput { stdout, stderr };

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                // A vendor code explains the failure better than the exit code.
                if output.first_domain_error().is_some() {
                    return Ok(output);
                }
                let exit_code = exit_code(&status).unwrap_or(-1);
                return Err(ExecError::NonZeroExit {
                    pod: pod.to_string(),
                    command: command.redacted(),
                    exit_code,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }

        Ok(output)
    }
}

fn exit_code(status: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Status) -> Option<i32> {
    status
        .details
        .as_ref()?
        .causes
        .as_ref()?
        .iter()
        .find(|c| c.reason.as_deref() == Some("ExitCode"))
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.parse().ok())
}

#[async_trait]
impl PodExecutor for KubePodExecutor {
    #[instrument(skip(self, command), fields(pod = %pod, command = %command.redacted()))]
    async fn exec(&self, pod: &PodRef, command: &Command) -> Result<CommandOutput, ExecError> {
        debug!("running command");
        match tokio::time::timeout(self.timeout, self.exec_inner(pod, command)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::transport(
                pod.to_string(),
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }
}
