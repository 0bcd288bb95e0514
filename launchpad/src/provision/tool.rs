//! Provisioning tool drivers

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::utils::{run_captured, sha256_hash, CommandOutput};

/// Saved plan file inside the working directory
pub const PLAN_FILE: &str = "launchpad.tfplan";

/// Resource handles read back after a successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutputs {
    pub instance_id: String,
    pub public_address: String,
    pub resource_ids: Vec<String>,
}

/// External tool that reconciles cloud resources against a template
///
/// `dir` holds the rendered template and the tool's own state. Calling
/// `apply` again with the same `dir` converges on the same resources.
#[async_trait]
pub trait ProvisioningTool: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the working directory and compute the change set
    async fn plan(&self, dir: &Path, cancel: &CancellationToken) -> Result<(), DeployError>;

    /// Apply the change set and read back the outputs
    async fn apply(&self, dir: &Path, cancel: &CancellationToken)
        -> Result<ToolOutputs, DeployError>;
}

/// Drives the terraform CLI
pub struct TerraformCli {
    bin: String,
    timeout: Duration,
}

impl TerraformCli {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    async fn run(
        &self,
        dir: &Path,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        let mut command = Command::new(&self.bin);
        command
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0");
        debug!("Running {} {}", self.bin, args.join(" "));

        let output = run_captured(command, self.timeout, cancel)
            .await
            .map_err(|e| match e {
                DeployError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    DeployError::ProvisioningToolUnavailable(format!("{} not found on PATH", self.bin))
                }
                DeployError::StageTimeout(secs) => DeployError::ProvisioningTimeout(secs),
                other => other,
            })?;

        if !output.ok {
            return Err(DeployError::ProvisioningApplyFailed {
                diagnostic: output.diagnostic(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl ProvisioningTool for TerraformCli {
    fn name(&self) -> &str {
        "terraform"
    }

    async fn plan(&self, dir: &Path, cancel: &CancellationToken) -> Result<(), DeployError> {
        self.run(dir, &["init", "-input=false", "-no-color"], cancel).await?;
        let out = format!("-out={}", PLAN_FILE);
        self.run(dir, &["plan", "-input=false", "-no-color", &out], cancel)
            .await?;
        Ok(())
    }

    async fn apply(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutputs, DeployError> {
        self.run(
            dir,
            &["apply", "-input=false", "-no-color", "-auto-approve", PLAN_FILE],
            cancel,
        )
        .await?;
        let output = self.run(dir, &["output", "-json"], cancel).await?;
        parse_outputs(&output.stdout)
    }
}

/// Parse `terraform output -json`
pub fn parse_outputs(stdout: &str) -> Result<ToolOutputs, DeployError> {
    let value: serde_json::Value = serde_json::from_str(stdout).map_err(|e| {
        DeployError::ProvisioningApplyFailed {
            diagnostic: format!("unreadable tool outputs: {}", e),
        }
    })?;

    let string_output = |name: &str| -> Result<String, DeployError> {
        value
            .get(name)
            .and_then(|o| o.get("value"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DeployError::ProvisioningApplyFailed {
                diagnostic: format!("output {} is missing", name),
            })
    };

    let instance_id = string_output("instance_id")?;
    let public_address = string_output("public_ip")?;
    let mut resource_ids: Vec<String> = value
        .get("resource_ids")
        .and_then(|o| o.get("value"))
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if !resource_ids.contains(&instance_id) {
        resource_ids.insert(0, instance_id.clone());
    }

    Ok(ToolOutputs {
        instance_id,
        public_address,
        resource_ids,
    })
}

/// State file written by `DemoTool`
pub const DEMO_STATE_FILE: &str = "demo.tfstate.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DemoState {
    outputs: ToolOutputs,
    #[serde(default)]
    applies: u32,
}

/// Simulated provisioning for demo mode
///
/// Keeps its state next to the template so repeated applies return the same
/// identifiers. Addresses come from the 203.0.113.0/24 documentation range.
#[derive(Debug, Default)]
pub struct DemoTool;

impl DemoTool {
    fn state_file(dir: &Path) -> File {
        File::new(dir.join(DEMO_STATE_FILE))
    }

    fn fresh_outputs(dir: &Path) -> ToolOutputs {
        let seed = sha256_hash(
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        let octet = u8::from_str_radix(&seed[..2], 16).unwrap_or(10) % 253 + 1;
        let instance_id = format!("i-{}", &seed[..17]);
        ToolOutputs {
            resource_ids: vec![
                instance_id.clone(),
                format!("sg-{}", &seed[17..34]),
                format!("eipalloc-{}", &seed[34..51]),
            ],
            instance_id,
            public_address: format!("203.0.113.{}", octet),
        }
    }
}

#[async_trait]
impl ProvisioningTool for DemoTool {
    fn name(&self) -> &str {
        "demo"
    }

    async fn plan(&self, dir: &Path, _cancel: &CancellationToken) -> Result<(), DeployError> {
        if !File::new(dir.join("main.tf")).exists().await {
            return Err(DeployError::ProvisioningApplyFailed {
                diagnostic: format!("no main.tf in {}", dir.display()),
            });
        }
        Ok(())
    }

    async fn apply(
        &self,
        dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutputs, DeployError> {
        let file = Self::state_file(dir);
        let mut state = if file.exists().await {
            file.read_json::<DemoState>().await?
        } else {
            DemoState {
                outputs: Self::fresh_outputs(dir),
                applies: 0,
            }
        };
        state.applies += 1;
        file.write_json_atomic(&state).await?;

        info!(
            "Demo apply #{} for {}: {}",
            state.applies,
            dir.display(),
            state.outputs.instance_id
        );
        Ok(state.outputs)
    }
}
