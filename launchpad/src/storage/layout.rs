//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable that overrides the base directory
pub const HOME_ENV: &str = "LAUNCHPAD_HOME";

/// On-disk layout for sessions, workspaces and provisioning state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// One JSON record per session
    pub fn sessions_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("sessions"))
    }

    /// Session-scoped repository workspaces
    pub fn workspaces_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("workspaces"))
    }

    /// Rendered templates and provisioning tool state, one dir per state key
    pub fn infra_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("infra"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.sessions_dir().create().await?;
        self.workspaces_dir().create().await?;
        self.infra_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Self::new(home);
        }

        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".launchpad");
        Self::new(base_dir)
    }
}
