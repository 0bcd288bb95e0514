//! Directory handles for the storage layout and session workspaces

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployError;
use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .is_ok_and(|meta| meta.is_dir())
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory tree; a missing directory is not an error
    pub async fn delete(&self) -> Result<(), DeployError> {
        match fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Replace whatever the directory holds with an empty directory
    pub async fn reset(&self) -> Result<(), DeployError> {
        self.delete().await?;
        self.create().await
    }

    /// Regular files directly inside with the given extension, sorted by path
    ///
    /// A missing directory yields no files.
    pub async fn files_with_extension(&self, extension: &str) -> Result<Vec<File>, DeployError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path.extension().and_then(|e| e.to_str()) == Some(extension);
            if matches && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths.into_iter().map(File::new).collect())
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
