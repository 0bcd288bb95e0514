//! Deployment plan models

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::framework::{Framework, Language};

/// Cloud providers with an implemented provisioning path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
        }
    }

    pub fn default_region(&self) -> &'static str {
        match self {
            Provider::Aws => "us-east-1",
            Provider::Gcp => "us-central1",
        }
    }

    /// Provider-specific machine type for a size class
    pub fn instance_type(&self, size: SizeClass) -> &'static str {
        match (self, size) {
            (Provider::Aws, SizeClass::Micro) => "t2.micro",
            (Provider::Aws, SizeClass::Small) => "t3.small",
            (Provider::Aws, SizeClass::Medium) => "t3.medium",
            (Provider::Aws, SizeClass::Large) => "t3.large",
            (Provider::Gcp, SizeClass::Micro) => "e2-micro",
            (Provider::Gcp, SizeClass::Small) => "e2-small",
            (Provider::Gcp, SizeClass::Medium) => "e2-medium",
            (Provider::Gcp, SizeClass::Large) => "e2-standard-2",
        }
    }

    /// Login user of the provider's default machine image
    pub fn default_remote_user(&self) -> &'static str {
        match self {
            Provider::Aws => "ec2-user",
            Provider::Gcp => "debian",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the application is run on the provisioned machine
///
/// Only these two variants can be realized today. A new style needs its own
/// template in `provision::template`, a launch path in `deploy::executor` and
/// a selection rule in `strategy`, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStyle {
    /// Application runs directly on a single virtual machine
    SingleVm,

    /// Application is built into an image and run by Docker on a single VM
    Containerized,
}

impl DeploymentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStyle::SingleVm => "single-vm",
            DeploymentStyle::Containerized => "containerized",
        }
    }
}

impl fmt::Display for DeploymentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-neutral machine size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Micro,
    Small,
    Medium,
    Large,
}

impl SizeClass {
    /// Parse a size hint: a class name or a provider instance type ending in one
    pub fn from_hint(hint: &str) -> Option<Self> {
        let hint = hint.trim().to_lowercase();
        let class = hint
            .rsplit(|c: char| c == '.' || c == '-')
            .next()
            .unwrap_or(hint.as_str());
        match class {
            "micro" | "nano" => Some(SizeClass::Micro),
            "small" => Some(SizeClass::Small),
            "medium" => Some(SizeClass::Medium),
            "large" | "xlarge" => Some(SizeClass::Large),
            _ => None,
        }
    }
}

/// Commands the executor runs on the remote machine, relative to the app dir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommands {
    /// Subdirectory that holds the application, "." for the repository root
    pub workdir: String,

    /// Dependency installation commands, run in order
    pub install: Vec<String>,

    /// Build commands, run after installation
    #[serde(default)]
    pub build: Vec<String>,

    /// Foreground start command; the executor backgrounds it
    pub start: String,
}

/// Fully resolved deployment parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub provider: Provider,
    pub framework: Framework,
    pub runtime: Language,
    pub style: DeploymentStyle,
    pub size: SizeClass,
    pub port: u16,
    pub region: String,
    pub launch: LaunchCommands,
}

impl DeploymentPlan {
    pub fn instance_type(&self) -> &'static str {
        self.provider.instance_type(self.size)
    }
}
