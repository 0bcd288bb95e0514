//! Durable session records

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::locks::KeyedLocks;
use crate::models::session::DeploymentSession;

/// One JSON record per session, replaced atomically on every transition
pub struct SessionStore {
    dir: Dir,
    locks: KeyedLocks,
}

impl SessionStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            locks: KeyedLocks::new(),
        }
    }

    fn record(&self, id: &str) -> Result<File, DeployError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DeployError::InvalidRequest(format!("invalid session id: {:?}", id)));
        }
        Ok(self.dir.file(&format!("{}.json", id)))
    }

    /// Persist a new session; fails if a record with the same id exists
    pub async fn create(&self, session: &DeploymentSession) -> Result<(), DeployError> {
        let file = self.record(&session.id)?;
        let _guard = self.locks.acquire(&session.id).await;
        file.create_new_json(session).await.map_err(|e| {
            DeployError::StorageError(format!("unable to create session {}: {}", session.id, e))
        })?;
        debug!("Created session record {}", file.path().display());
        Ok(())
    }

    /// Replace the stored record with `session`
    pub async fn save(&self, session: &DeploymentSession) -> Result<(), DeployError> {
        let file = self.record(&session.id)?;
        let _guard = self.locks.acquire(&session.id).await;
        file.write_json_atomic(session).await.map_err(|e| {
            DeployError::StorageError(format!("unable to save session {}: {}", session.id, e))
        })
    }

    pub async fn load(&self, id: &str) -> Result<DeploymentSession, DeployError> {
        let file = self.record(id)?;
        if !file.exists().await {
            return Err(DeployError::StorageError(format!("session {} not found", id)));
        }
        file.read_json().await.map_err(|e| {
            DeployError::StorageError(format!("unable to read session {}: {}", id, e))
        })
    }

    /// Every readable session, oldest first
    ///
    /// Unreadable records are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<DeploymentSession>, DeployError> {
        let mut sessions = Vec::new();
        for file in self.dir.files_with_extension("json").await? {
            match file.read_json::<DeploymentSession>().await {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session record {}: {}", file.path().display(), e),
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }
}
