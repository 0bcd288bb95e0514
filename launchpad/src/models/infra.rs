//! Provisioned infrastructure models

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::plan::Provider;

/// Reference to the provisioning tool's own state
///
/// The working directory holds the rendered template and the tool's state
/// file. Passing the same reference again lets the tool reconcile against the
/// resources it already created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRef {
    /// Stable key, one per session
    pub key: String,

    /// Working directory of the provisioning tool
    pub dir: PathBuf,
}

impl StateRef {
    pub fn new(key: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Resource handles returned by the provisioning tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedInfrastructure {
    pub provider: Provider,

    /// Compute instance identifier
    pub instance_id: String,

    /// Public IP or hostname
    pub public_address: String,

    /// Every resource identifier the tool reported, instance included
    #[serde(default)]
    pub resource_ids: Vec<String>,

    /// The tool's state, reused on every re-invocation
    pub state_ref: StateRef,

    /// SHA-256 of the rendered template
    #[serde(default)]
    pub template_digest: String,

    /// Whether the readiness probe succeeded
    #[serde(default)]
    pub ready: bool,

    pub provisioned_at: DateTime<Utc>,
}
