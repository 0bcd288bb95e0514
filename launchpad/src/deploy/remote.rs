//! Remote command execution over SSH

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::DeployError;
use crate::utils::{run_captured, run_captured_with_input, CommandOutput};

/// Opaque reference to the private key used for remote access
///
/// Only the SSH client reads it. Debug output and diagnostics never show it.
#[derive(Clone)]
pub struct CredentialRef(Arc<SecretString>);

impl CredentialRef {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(key_path.into())))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Replace any occurrence of the reference in tool output
    fn redact(&self, text: &str) -> String {
        let secret = self.expose();
        if secret.is_empty() {
            return text.to_string();
        }
        text.replace(secret, "<credential>")
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialRef(<redacted>)")
    }
}

/// Where remote commands run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub address: String,
    pub user: String,
    pub port: u16,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}

/// Transfers files to and runs scripts on a provisioned machine
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Copy one local file to `remote_path`
    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError>;

    /// Run a shell script with `bash -s`
    async fn exec(
        &self,
        target: &RemoteTarget,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError>;
}

/// OpenSSH client binaries
pub struct SshRemote {
    ssh_bin: String,
    scp_bin: String,
    credential: Option<CredentialRef>,
    timeout: Duration,
}

impl SshRemote {
    pub fn new(
        ssh_bin: impl Into<String>,
        scp_bin: impl Into<String>,
        credential: Option<CredentialRef>,
        timeout: Duration,
    ) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            scp_bin: scp_bin.into(),
            credential,
            timeout,
        }
    }

    fn common_args(&self, command: &mut Command) {
        command.args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ConnectTimeout=10",
        ]);
        if let Some(credential) = &self.credential {
            command.arg("-i").arg(credential.expose());
        }
    }

    fn scrub(&self, mut output: CommandOutput) -> CommandOutput {
        if let Some(credential) = &self.credential {
            output.command = credential.redact(&output.command);
            output.stdout = credential.redact(&output.stdout);
            output.stderr = credential.redact(&output.stderr);
        }
        output
    }

    fn map_spawn_error(&self, bin: &str, err: DeployError) -> DeployError {
        match err {
            DeployError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
                DeployError::TransferFailed(format!("{} not found on PATH", bin))
            }
            other => other,
        }
    }
}

#[async_trait]
impl RemoteRunner for SshRemote {
    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        let mut command = Command::new(&self.scp_bin);
        self.common_args(&mut command);
        command
            .arg("-P")
            .arg(target.port.to_string())
            .arg(local)
            .arg(format!("{}@{}:{}", target.user, target.address, remote_path));

        debug!("Uploading {} to {}", local.display(), target);
        run_captured(command, self.timeout, cancel)
            .await
            .map(|output| self.scrub(output))
            .map_err(|e| self.map_spawn_error(&self.scp_bin, e))
    }

    async fn exec(
        &self,
        target: &RemoteTarget,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        let mut command = Command::new(&self.ssh_bin);
        self.common_args(&mut command);
        command
            .arg("-p")
            .arg(target.port.to_string())
            .arg(format!("{}@{}", target.user, target.address))
            .arg("bash -s");

        debug!("Running remote script on {}", target);
        run_captured_with_input(command, Some(script.as_bytes()), self.timeout, cancel)
            .await
            .map(|output| self.scrub(output))
            .map_err(|e| self.map_spawn_error(&self.ssh_bin, e))
    }
}

/// Records what would run remotely and reports success
///
/// Used by demo mode and tests.
#[derive(Debug, Default)]
pub struct DryRunRemote {
    log: Mutex<Vec<String>>,
}

impl DryRunRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload and script seen so far, in order
    pub fn recorded(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, entry: String) -> CommandOutput {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push(entry.clone());
        CommandOutput {
            command: entry,
            ok: true,
            stdout: String::new(),
            stderr: String::new(),
            returncode: 0,
        }
    }
}

#[async_trait]
impl RemoteRunner for DryRunRemote {
    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote_path: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        Ok(self.record(format!(
            "upload {} {}:{}",
            local.display(),
            target,
            remote_path
        )))
    }

    async fn exec(
        &self,
        target: &RemoteTarget,
        script: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        Ok(self.record(format!("exec {} {}", target, script)))
    }
}
