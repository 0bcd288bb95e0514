//! Utility functions

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::DeployError;

/// Version information for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay; `attempt` is 0-based
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(exponent);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::try_from_secs_f64(capped_delay).unwrap_or(options.max_delay)
}

/// Hex SHA-256 of data
pub fn sha256_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Sleep for `duration` unless cancelled first
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), DeployError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(DeployError::Cancelled),
    }
}

/// Run a future under a deadline and a cancellation token
///
/// `on_timeout` builds the error returned when the deadline elapses.
pub async fn bounded<T, F>(
    future: F,
    timeout: Duration,
    cancel: &CancellationToken,
    on_timeout: impl FnOnce() -> DeployError,
) -> Result<T, DeployError>
where
    F: Future<Output = Result<T, DeployError>>,
{
    tokio::select! {
        result = tokio::time::timeout(timeout, future) => match result {
            Ok(inner) => inner,
            Err(_) => Err(on_timeout()),
        },
        _ = cancel.cancelled() => Err(DeployError::Cancelled),
    }
}

/// Captured result of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Program and arguments, for diagnostics
    pub command: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandOutput {
    /// Stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

/// Program and arguments joined with spaces
pub fn display_command(command: &Command) -> String {
    let std_command = command.as_std();
    let mut display = std_command.get_program().to_string_lossy().to_string();
    for arg in std_command.get_args() {
        display.push(' ');
        display.push_str(&arg.to_string_lossy());
    }
    display
}

/// Run a command to completion and capture its output
///
/// A missing binary surfaces as an `io::ErrorKind::NotFound` IO error so
/// callers can map it to their own "tool unavailable" kind. The child is
/// killed when the deadline elapses or the token is cancelled.
pub async fn run_captured(
    command: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, DeployError> {
    run_captured_with_input(command, None, timeout, cancel).await
}

/// `run_captured` with bytes written to the child's stdin
pub async fn run_captured_with_input(
    mut command: Command,
    input: Option<&[u8]>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, DeployError> {
    let display = display_command(&command);
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let child_stdin = child.stdin.take();
    // Feeding stdin counts against the deadline
    let run = async move {
        if let (Some(input), Some(mut child_stdin)) = (input, child_stdin) {
            child_stdin.write_all(input).await?;
            // Dropping stdin sends EOF
            drop(child_stdin);
        }
        child.wait_with_output().await
    };

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, run) => match result {
            Ok(output) => output?,
            Err(_) => return Err(DeployError::StageTimeout(timeout.as_secs())),
        },
        _ = cancel.cancelled() => return Err(DeployError::Cancelled),
    };

    Ok(CommandOutput {
        command: display,
        ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        returncode: output.status.code().unwrap_or(-1),
    })
}
