//! Repository analysis: fetch, extract, scan and score

pub mod fetch;
pub mod rules;
pub mod scan;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::framework::Language;
use crate::models::request::DeploymentRequest;
use crate::models::snapshot::RepositorySnapshot;

use self::fetch::Fetcher;

/// Fetches a repository into a session workspace and extracts its signals
pub struct RepositoryAnalyzer {
    fetcher: Fetcher,
    workspaces: Dir,
}

impl RepositoryAnalyzer {
    pub fn new(workspaces: Dir, fetch_timeout: Duration) -> Result<Self, DeployError> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_timeout)?,
            workspaces,
        })
    }

    /// Workspace directory for a session
    pub fn workspace_for(&self, session_id: &str) -> Dir {
        self.workspaces.subdir(session_id)
    }

    /// Produce a snapshot of the requested repository
    ///
    /// Any previous contents of the session workspace are replaced.
    pub async fn analyze(
        &self,
        request: &DeploymentRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RepositorySnapshot, DeployError> {
        let workspace = self.workspace_for(session_id);
        workspace.reset().await?;

        info!("Fetching repository {}", request.repository);
        let bytes = self.fetcher.fetch(&request.repository, cancel).await?;
        let root = fetch::extract(bytes, workspace.path().to_path_buf()).await?;

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let scan_root = root.clone();
        let result = tokio::task::spawn_blocking(move || scan::scan(&scan_root))
            .await
            .map_err(|e| DeployError::Internal(format!("scan task failed: {}", e)))??;

        if result.file_count == 0 {
            return Err(DeployError::EmptyRepository(request.repository.to_string()));
        }

        let candidates = rules::score(&result.signals);
        debug!("Framework candidates: {:?}", candidates);

        let language = candidates
            .first()
            .map(|c| c.framework.language())
            .or_else(|| result.manifest_languages.first().copied());

        let snapshot = RepositorySnapshot {
            digest: result.digest,
            workspace: workspace.path().to_path_buf(),
            root,
            language,
            candidates,
            dependencies: result.signals.dependencies.into_iter().collect(),
            detected_port: result.detected_port,
            container_descriptor: result.container_descriptor,
            entry_points: result.entry_points,
            config_files: result.config_files,
            manifests: result.manifests,
            file_count: result.file_count,
        };

        info!(
            "Analyzed {} files, language {}, top framework {}",
            snapshot.file_count,
            snapshot.language.map(|l| l.as_str()).unwrap_or("unknown"),
            snapshot
                .top_candidate()
                .map(|c| c.framework.as_str())
                .unwrap_or("none"),
        );
        Ok(snapshot)
    }
}

/// Primary manifest for a language, shallowest first
pub fn primary_manifest(snapshot: &RepositorySnapshot, language: Language) -> Option<&str> {
    snapshot
        .manifests
        .iter()
        .find(|path| {
            let name = path.rsplit('/').next().unwrap_or(path);
            scan::manifest_language(name) == Some(language)
        })
        .map(String::as_str)
}
