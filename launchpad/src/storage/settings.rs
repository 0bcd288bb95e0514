//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Launchpad settings, read from `settings.json`
///
/// Every field has a default so a partial (or absent) file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to the layout's logs directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Simulate provisioning and remote execution
    #[serde(default)]
    pub demo_mode: bool,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub aws: AwsSettings,

    #[serde(default)]
    pub gcp: GcpSettings,

    /// Probe run after provisioning
    #[serde(default = "default_readiness")]
    pub readiness: ProbeSettings,

    /// Probe run after the application is started
    #[serde(default = "default_liveness")]
    pub liveness: ProbeSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Candidates closer than this many score points are ambiguous
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: u32,
}

fn default_true() -> bool {
    true
}

fn default_ambiguity_margin() -> u32 {
    2
}

fn default_readiness() -> ProbeSettings {
    ProbeSettings {
        initial_delay_secs: 5,
        max_delay_secs: 60,
        deadline_secs: 300,
        target: ProbeTarget::RemoteAccess,
    }
}

fn default_liveness() -> ProbeSettings {
    ProbeSettings {
        initial_delay_secs: 2,
        max_delay_secs: 30,
        deadline_secs: 180,
        target: ProbeTarget::ApplicationPort,
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            demo_mode: false,
            tools: ToolSettings::default(),
            remote: RemoteSettings::default(),
            aws: AwsSettings::default(),
            gcp: GcpSettings::default(),
            readiness: default_readiness(),
            liveness: default_liveness(),
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            ambiguity_margin: default_ambiguity_margin(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file does not exist
    pub async fn load_or_default(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            DeployError::ConfigError(format!(
                "unable to read {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// External binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,

    #[serde(default = "default_ssh_bin")]
    pub ssh_bin: String,

    #[serde(default = "default_scp_bin")]
    pub scp_bin: String,
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_ssh_bin() -> String {
    "ssh".to_string()
}

fn default_scp_bin() -> String {
    "scp".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            terraform_bin: default_terraform_bin(),
            ssh_bin: default_ssh_bin(),
            scp_bin: default_scp_bin(),
        }
    }
}

/// Remote access to provisioned machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Private key passed to ssh/scp; never logged
    #[serde(default)]
    pub ssh_key_path: Option<String>,

    /// Login user; defaults to the provider image's user
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Directory the repository is copied into on the remote machine
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_app_dir() -> String {
    "/opt/app".to_string()
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            ssh_key_path: None,
            user: None,
            ssh_port: default_ssh_port(),
            app_dir: default_app_dir(),
        }
    }
}

/// AWS template parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default = "default_ami_id")]
    pub ami_id: String,

    #[serde(default = "default_key_name")]
    pub key_name: String,
}

fn default_ami_id() -> String {
    "ami-0c55b159cbfafe1f0".to_string()
}

fn default_key_name() -> String {
    "launchpad-key".to_string()
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            ami_id: default_ami_id(),
            key_name: default_key_name(),
        }
    }
}

/// GCP template parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSettings {
    #[serde(default)]
    pub project: Option<String>,

    /// Zone suffix appended to the region, e.g. "a"
    #[serde(default = "default_zone_suffix")]
    pub zone_suffix: String,

    #[serde(default = "default_gcp_image")]
    pub image: String,
}

fn default_zone_suffix() -> String {
    "a".to_string()
}

fn default_gcp_image() -> String {
    "debian-cloud/debian-12".to_string()
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            project: None,
            zone_suffix: default_zone_suffix(),
            image: default_gcp_image(),
        }
    }
}

/// Which port a probe targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTarget {
    /// The remote-access (SSH) port
    RemoteAccess,

    /// The plan's application port
    ApplicationPort,
}

/// Bounded exponential backoff probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub deadline_secs: u64,
    pub target: ProbeTarget,
}

/// Stage retry policy for transient errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub base_delay_secs: u64,

    #[serde(default = "default_retry_max_delay")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_retry_max_delay() -> u64 {
    60
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_retry_base_delay(),
            max_delay_secs: default_retry_max_delay(),
        }
    }
}

/// Per-stage deadlines in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_analyze_timeout")]
    pub analyze_secs: u64,

    #[serde(default = "default_provision_timeout")]
    pub provision_secs: u64,

    #[serde(default = "default_adapt_timeout")]
    pub adapt_secs: u64,

    #[serde(default = "default_deploy_timeout")]
    pub deploy_secs: u64,

    #[serde(default = "default_verify_timeout")]
    pub verify_secs: u64,
}

fn default_analyze_timeout() -> u64 {
    300
}

fn default_provision_timeout() -> u64 {
    1800
}

fn default_adapt_timeout() -> u64 {
    60
}

fn default_deploy_timeout() -> u64 {
    900
}

fn default_verify_timeout() -> u64 {
    300
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            analyze_secs: default_analyze_timeout(),
            provision_secs: default_provision_timeout(),
            adapt_secs: default_adapt_timeout(),
            deploy_secs: default_deploy_timeout(),
            verify_secs: default_verify_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"demo_mode": true, "retry": {"max_attempts": 5}}"#).unwrap();
        assert!(settings.demo_mode);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_secs, 5);
        assert_eq!(settings.tools.terraform_bin, "terraform");
        assert_eq!(settings.readiness.target, ProbeTarget::RemoteAccess);
        assert_eq!(settings.liveness.target, ProbeTarget::ApplicationPort);
        assert_eq!(settings.ambiguity_margin, 2);
    }
}
