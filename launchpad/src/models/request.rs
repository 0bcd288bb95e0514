//! Deployment request models

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Where the repository bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "location", rename_all = "snake_case")]
pub enum RepoSource {
    /// Remote URL, either a direct archive link or a GitHub repository page
    Url(String),

    /// Archive file on the local filesystem
    Archive(PathBuf),
}

impl RepoSource {
    /// Classify a user-supplied repository reference
    pub fn parse(reference: &str) -> Result<Self, DeployError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DeployError::InvalidRequest(
                "repository reference is empty".to_string(),
            ));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            url::Url::parse(reference).map_err(|e| {
                DeployError::InvalidRequest(format!("invalid repository URL {}: {}", reference, e))
            })?;
            return Ok(RepoSource::Url(reference.to_string()));
        }

        // Bare github.com/owner/repo references are common in chat input
        if reference.starts_with("github.com/") {
            return Ok(RepoSource::Url(format!("https://{}", reference)));
        }

        Ok(RepoSource::Archive(PathBuf::from(reference)))
    }
}

impl fmt::Display for RepoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoSource::Url(url) => write!(f, "{}", url),
            RepoSource::Archive(path) => write!(f, "{}", path.display()),
        }
    }
}

/// User-declared hints; every field overrides the matching detected signal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_size: Option<String>,
}

/// Immutable input for one deployment session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Repository to deploy
    pub repository: RepoSource,

    /// Provider, framework, region and size hints
    #[serde(default)]
    pub hints: DeploymentHints,

    /// Free-text description from the user
    #[serde(default)]
    pub description: String,

    /// Provisioning and remote execution are simulated for this session
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub demo: bool,
}

impl DeploymentRequest {
    pub fn new(repository: RepoSource) -> Self {
        Self {
            repository,
            hints: DeploymentHints::default(),
            description: String::new(),
            demo: false,
        }
    }

    pub fn with_hints(mut self, hints: DeploymentHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_demo(mut self, demo: bool) -> Self {
        self.demo = demo;
        self
    }
}
