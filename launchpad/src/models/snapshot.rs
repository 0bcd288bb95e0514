//! Repository snapshot models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::framework::{Framework, Language};

/// A framework the analyzer found evidence for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkCandidate {
    pub framework: Framework,

    /// Sum of the weights of every rule that matched
    pub score: u32,

    /// Human-readable list of the matched rules
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Local copy of an analyzed repository plus the signals extracted from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    /// SHA-256 over every file's relative path and contents
    pub digest: String,

    /// Session-scoped workspace the repository was extracted into
    pub workspace: PathBuf,

    /// Repository root inside the workspace
    pub root: PathBuf,

    /// Detected language, if any manifest or framework identified one
    #[serde(default)]
    pub language: Option<Language>,

    /// Framework candidates, best first
    #[serde(default)]
    pub candidates: Vec<FrameworkCandidate>,

    /// Declared dependency names
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Port found in the application source
    #[serde(default)]
    pub detected_port: Option<u16>,

    /// Relative path of a Dockerfile or compose file, if present
    #[serde(default)]
    pub container_descriptor: Option<String>,

    /// Relative paths of application entry files
    #[serde(default)]
    pub entry_points: Vec<String>,

    /// Relative paths of configuration files
    #[serde(default)]
    pub config_files: Vec<String>,

    /// Relative paths of dependency manifests, shallowest first
    #[serde(default)]
    pub manifests: Vec<String>,

    /// Number of regular files in the repository
    #[serde(default)]
    pub file_count: usize,
}

impl RepositorySnapshot {
    /// Highest ranked framework candidate
    pub fn top_candidate(&self) -> Option<&FrameworkCandidate> {
        self.candidates.first()
    }

    /// Files the code adapter is allowed to touch, in a stable order
    pub fn adaptation_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .entry_points
            .iter()
            .chain(self.config_files.iter())
            .cloned()
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}
