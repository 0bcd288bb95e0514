//! Application configuration options

use std::time::Duration;

use crate::deploy::executor::ExecutorOptions;
use crate::deploy::remote::CredentialRef;
use crate::orchestrator::retry::StagePolicies;
use crate::provision::probe::ProbePolicy;
use crate::provision::template::TemplateSettings;
use crate::provision::ProvisionerOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ProbeSettings, Settings, ToolSettings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Use the simulated tool, remote and probe
    pub demo_mode: bool,

    /// External binaries
    pub tools: ToolSettings,

    /// SSH private key reference
    pub credential: Option<CredentialRef>,

    pub provisioner: ProvisionerOptions,

    pub executor: ExecutorOptions,

    pub policies: StagePolicies,

    pub ambiguity_margin: u32,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let policies = StagePolicies::from_settings(&settings.retry, &settings.timeouts);
        Self {
            layout,
            demo_mode: settings.demo_mode,
            tools: settings.tools.clone(),
            credential: settings
                .remote
                .ssh_key_path
                .as_deref()
                .filter(|path| !path.is_empty())
                .map(CredentialRef::new),
            provisioner: ProvisionerOptions {
                template: TemplateSettings {
                    aws: settings.aws.clone(),
                    gcp: settings.gcp.clone(),
                    ssh_port: settings.remote.ssh_port,
                },
                readiness: probe_policy(&settings.readiness),
                readiness_target: settings.readiness.target,
            },
            executor: ExecutorOptions {
                remote_user: settings.remote.user.clone(),
                ssh_port: settings.remote.ssh_port,
                app_dir: settings.remote.app_dir.clone(),
                liveness: probe_policy(&settings.liveness),
                liveness_target: settings.liveness.target,
            },
            policies,
            ambiguity_margin: settings.ambiguity_margin,
        }
    }

    /// Deadline for one provisioning tool invocation
    pub fn tool_timeout(&self) -> Duration {
        self.policies.provision
    }

    /// Deadline for one remote command
    pub fn remote_timeout(&self) -> Duration {
        self.policies.deploy
    }

    /// Deadline for one repository download
    pub fn fetch_timeout(&self) -> Duration {
        self.policies.analyze
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

fn probe_policy(settings: &ProbeSettings) -> ProbePolicy {
    ProbePolicy {
        initial_delay: Duration::from_secs(settings.initial_delay_secs),
        max_delay: Duration::from_secs(settings.max_delay_secs),
        deadline: Duration::from_secs(settings.deadline_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::ProbeTarget;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.remote.ssh_key_path = Some("/keys/deploy".to_string());
        settings.retry.max_attempts = 0;
        let options = AppOptions::from_settings(&settings, StorageLayout::new("/tmp/lp"));

        assert!(options.credential.is_some());
        assert_eq!(options.policies.max_attempts, 1);
        assert_eq!(options.provisioner.readiness_target, ProbeTarget::RemoteAccess);
        assert_eq!(options.provisioner.readiness.deadline, Duration::from_secs(300));
        assert_eq!(options.executor.liveness.initial_delay, Duration::from_secs(2));
        assert!(!format!("{:?}", options).contains("/keys/deploy"));
    }
}
