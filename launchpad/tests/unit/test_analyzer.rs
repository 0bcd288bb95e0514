//! Repository analyzer tests

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use launchpad::analyzer::RepositoryAnalyzer;
use launchpad::errors::DeployError;
use launchpad::filesys::dir::Dir;
use launchpad::models::framework::{Framework, Language};
use launchpad::models::request::{DeploymentRequest, RepoSource};

use crate::common::{flask_archive, write_zip};

fn analyzer(dir: &std::path::Path) -> RepositoryAnalyzer {
    RepositoryAnalyzer::new(Dir::new(dir.join("workspaces")), Duration::from_secs(30)).unwrap()
}

#[tokio::test]
async fn test_flask_archive_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = flask_archive(dir.path());
    let request = DeploymentRequest::new(RepoSource::Archive(archive));

    let snapshot = analyzer(dir.path())
        .analyze(&request, "session-a", &CancellationToken::new())
        .await
        .unwrap();

    assert!(snapshot.root.ends_with("hello-flask-main"));
    assert_eq!(snapshot.language, Some(Language::Python));
    assert_eq!(snapshot.top_candidate().unwrap().framework, Framework::Flask);
    assert_eq!(snapshot.detected_port, Some(5000));
    assert_eq!(snapshot.entry_points, vec!["app.py"]);
    assert!(snapshot.dependencies.contains(&"flask".to_string()));
    assert_eq!(snapshot.file_count, 3);
}

#[tokio::test]
async fn test_digest_ignores_workspace_location() {
    let dir = tempfile::tempdir().unwrap();
    let archive = flask_archive(dir.path());
    let request = DeploymentRequest::new(RepoSource::Archive(archive));
    let analyzer = analyzer(dir.path());
    let cancel = CancellationToken::new();

    let a = analyzer.analyze(&request, "session-a", &cancel).await.unwrap();
    let b = analyzer.analyze(&request, "session-b", &cancel).await.unwrap();
    assert_ne!(a.workspace, b.workspace);
    assert_eq!(a.digest, b.digest);
    assert_eq!(a.candidates, b.candidates);
}

#[tokio::test]
async fn test_empty_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(&dir.path().join("empty.zip"), None, &[]);
    let request = DeploymentRequest::new(RepoSource::Archive(archive));

    let err = analyzer(dir.path())
        .analyze(&request, "session-a", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::EmptyRepository(_)));
}

#[tokio::test]
async fn test_missing_archive_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let request = DeploymentRequest::new(RepoSource::Archive(dir.path().join("nope.zip")));

    let err = analyzer(dir.path())
        .analyze(&request, "session-a", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::RepositoryUnavailable(_)));
    assert!(err.is_retryable());
}
