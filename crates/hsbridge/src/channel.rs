//! Per-call subprocess transport.

use std::{
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::process::Command;
use tracing::{debug, debug_span};

use crate::{
    TRACE_TARGET,
    config::ChannelConfig,
    error::{Error, Result},
    runtime::Executor,
};

/// Evaluates a code snippet in the remote runtime and returns its printed
/// output.
///
/// Every call is synchronous. Implementations must be safe to call from
/// several host threads at once.
pub trait Channel: Send + Sync + 'static {
    /// # Errors
    /// Returns a channel error if the snippet could not be evaluated within
    /// `timeout`.
    fn execute(&self, code: &str, timeout: Duration) -> Result<String>;
}

impl<T: Channel + ?Sized> Channel for Arc<T> {
    fn execute(&self, code: &str, timeout: Duration) -> Result<String> {
        (**self).execute(code, timeout)
    }
}

/// Spawns the configured front end once per call.
///
/// `execute` blocks the calling thread and must not be used from inside an
/// async task.
pub struct CommandChannel {
    config: ChannelConfig,
    executor: Arc<Executor>,
}

impl CommandChannel {
    /// # Errors
    /// Returns an error if the background runtime cannot be started.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Ok(Self::with_executor(config, Arc::new(Executor::new(1)?)))
    }

    pub(crate) const fn with_executor(config: ChannelConfig, executor: Arc<Executor>) -> Self {
        Self { config, executor }
    }

    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Evaluate with the configured default timeout.
    ///
    /// # Errors
    /// See [`Channel::execute`].
    pub fn run(&self, code: &str) -> Result<String> {
        self.execute(code, self.config.timeout)
    }

    async fn spawn_and_wait(&self, code: &str, timeout: Duration) -> Result<String> {
        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        // Dropping the pending wait on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::ChannelTimeout { timeout })??;

        classify(output.status, &output.stdout, &output.stderr)
    }
}

impl Channel for CommandChannel {
    fn execute(&self, code: &str, timeout: Duration) -> Result<String> {
        let span = debug_span!(
            target: TRACE_TARGET,
            "channel.execute",
            program = %self.config.program.display(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        );
        let _enter = span.enter();

        let start = Instant::now();
        let result = self.executor.block_on(self.spawn_and_wait(code, timeout));
        debug!(
            target: TRACE_TARGET,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "front end finished"
        );
        result
    }
}

/// Map a finished front-end process to its result text or error.
///
/// # Errors
/// [`Error::ChannelProcessFailure`] for a non-zero exit and
/// [`Error::RemoteSyntaxError`] when stdout contains `error:` in any case.
pub fn classify(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Result<String> {
    let stdout = String::from_utf8_lossy(stdout).trim_end().to_string();
    if !status.success() {
        let stderr = String::from_utf8_lossy(stderr).trim_end().to_string();
        return Err(Error::ChannelProcessFailure {
            status,
            diagnostics: if stderr.is_empty() { stdout } else { stderr },
        });
    }
    if stdout.to_lowercase().contains("error:") {
        return Err(Error::RemoteSyntaxError { output: stdout });
    }
    Ok(stdout)
}
