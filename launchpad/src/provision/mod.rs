//! Infrastructure provisioning

pub mod probe;
pub mod template;
pub mod tool;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::locks::KeyedLocks;
use crate::models::infra::{ProvisionedInfrastructure, StateRef};
use crate::models::plan::DeploymentPlan;
use crate::storage::settings::ProbeTarget;

use self::probe::{wait_until_ready, Probe, ProbeFailure, ProbePolicy};
use self::template::TemplateSettings;
use self::tool::ProvisioningTool;

/// Provisioner configuration
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    pub template: TemplateSettings,
    pub readiness: ProbePolicy,
    pub readiness_target: ProbeTarget,
}

/// Renders templates and drives the provisioning tool
pub struct InfrastructureProvisioner {
    tool: Arc<dyn ProvisioningTool>,
    probe: Arc<dyn Probe>,
    infra_root: Dir,
    locks: KeyedLocks,
    options: ProvisionerOptions,
}

impl InfrastructureProvisioner {
    pub fn new(
        tool: Arc<dyn ProvisioningTool>,
        probe: Arc<dyn Probe>,
        infra_root: Dir,
        options: ProvisionerOptions,
    ) -> Self {
        Self {
            tool,
            probe,
            infra_root,
            locks: KeyedLocks::new(),
            options,
        }
    }

    /// State reference for a key under the infra root
    pub fn state_ref(&self, key: &str) -> StateRef {
        StateRef::new(key, self.infra_root.subdir(key).path())
    }

    /// Create or converge the infrastructure for `plan`
    ///
    /// With a `prior` result the same state reference is reused, so the tool
    /// reconciles instead of creating a second resource set. When the
    /// readiness probe gives up the error carries the handles obtained.
    pub async fn provision(
        &self,
        plan: &DeploymentPlan,
        prior: Option<&ProvisionedInfrastructure>,
        state_key: &str,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInfrastructure, DeployError> {
        let state_ref = prior
            .map(|p| p.state_ref.clone())
            .unwrap_or_else(|| self.state_ref(state_key));
        let rendered = template::render(plan, &self.options.template, &state_ref.key)?;

        let outputs = {
            let _guard = self.locks.acquire(&state_ref.key).await;
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }

            let dir = Dir::new(state_ref.dir());
            rendered.write_to(&dir).await?;

            info!(
                "Provisioning {} {} in {} with {}",
                plan.provider,
                plan.instance_type(),
                plan.region,
                self.tool.name()
            );
            self.tool.plan(dir.path(), cancel).await?;
            self.tool.apply(dir.path(), cancel).await?
        };

        let mut infra = ProvisionedInfrastructure {
            provider: plan.provider,
            instance_id: outputs.instance_id,
            public_address: outputs.public_address,
            resource_ids: outputs.resource_ids,
            state_ref,
            template_digest: rendered.digest,
            ready: false,
            provisioned_at: Utc::now(),
        };
        info!(
            "Provisioned {} at {}",
            infra.instance_id, infra.public_address
        );

        let port = match self.options.readiness_target {
            ProbeTarget::RemoteAccess => self.options.template.ssh_port,
            ProbeTarget::ApplicationPort => plan.port,
        };

        match wait_until_ready(
            self.probe.as_ref(),
            &infra.public_address,
            port,
            &self.options.readiness,
            cancel,
        )
        .await
        {
            Ok(_) => {
                infra.ready = true;
                Ok(infra)
            }
            Err(ProbeFailure::Cancelled) => Err(DeployError::Cancelled),
            Err(ProbeFailure::Deadline {
                attempts,
                last_error,
            }) => {
                warn!(
                    "{}:{} not ready after {} probes: {}",
                    infra.public_address, port, attempts, last_error
                );
                Err(DeployError::InfrastructureNotReady {
                    reason: format!(
                        "{}:{} unreachable after {} probes: {}",
                        infra.public_address, port, attempts, last_error
                    ),
                    partial: Box::new(infra),
                })
            }
        }
    }
}
