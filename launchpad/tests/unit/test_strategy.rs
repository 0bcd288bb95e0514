//! Strategy decision tests over analyzed archives

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use launchpad::analyzer::RepositoryAnalyzer;
use launchpad::errors::DeployError;
use launchpad::filesys::dir::Dir;
use launchpad::models::framework::Framework;
use launchpad::models::plan::{DeploymentStyle, Provider};
use launchpad::models::request::{DeploymentHints, DeploymentRequest, RepoSource};
use launchpad::models::snapshot::RepositorySnapshot;
use launchpad::strategy::StrategyDecisionEngine;

use crate::common::{flask_archive, write_zip};

async fn snapshot(archive: std::path::PathBuf, workspaces: &std::path::Path, id: &str) -> RepositorySnapshot {
    RepositoryAnalyzer::new(Dir::new(workspaces), Duration::from_secs(30))
        .unwrap()
        .analyze(
            &DeploymentRequest::new(RepoSource::Archive(archive)),
            id,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_identical_content_gives_identical_plans() {
    let dir = tempfile::tempdir().unwrap();
    let archive = flask_archive(dir.path());
    let workspaces = dir.path().join("workspaces");
    let engine = StrategyDecisionEngine::new(2);
    let hints = DeploymentHints {
        provider: Some("aws".to_string()),
        ..Default::default()
    };

    let a = engine
        .decide(&snapshot(archive.clone(), &workspaces, "one").await, &hints)
        .unwrap();
    let b = engine
        .decide(&snapshot(archive, &workspaces, "two").await, &hints)
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    assert_eq!(a.provider, Provider::Aws);
    assert_eq!(a.framework, Framework::Flask);
    assert_eq!(a.port, 5000);
    assert_eq!(a.style, DeploymentStyle::SingleVm);
}

#[tokio::test]
async fn test_dockerfile_selects_containerized() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(
        &dir.path().join("express.zip"),
        None,
        &[
            (
                "package.json",
                r#"{"name": "api", "dependencies": {"express": "^4.18.0"}}"#,
            ),
            (
                "server.js",
                "const express = require('express');\nconst app = express();\napp.listen(4000);\n",
            ),
            ("Dockerfile", "FROM node:20\nCOPY . .\nCMD [\"node\", \"server.js\"]\n"),
        ],
    );

    let snapshot = snapshot(archive, &dir.path().join("workspaces"), "one").await;
    let plan = StrategyDecisionEngine::new(2)
        .decide(&snapshot, &DeploymentHints::default())
        .unwrap();
    assert_eq!(plan.framework, Framework::Express);
    assert_eq!(plan.style, DeploymentStyle::Containerized);
    assert_eq!(plan.port, 4000);
}

#[tokio::test]
async fn test_unsupported_provider_wins_over_detection() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot(flask_archive(dir.path()), &dir.path().join("workspaces"), "one").await;
    let hints = DeploymentHints {
        provider: Some("azure".to_string()),
        ..Default::default()
    };

    let err = StrategyDecisionEngine::new(2).decide(&snapshot, &hints).unwrap_err();
    assert!(matches!(err, DeployError::UnsupportedProvider(ref p) if p == "azure"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_framework_hint_uses_its_default_port() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot(flask_archive(dir.path()), &dir.path().join("workspaces"), "one").await;
    assert_eq!(snapshot.detected_port, Some(5000));
    let engine = StrategyDecisionEngine::new(2);

    let hinted = engine
        .decide(
            &snapshot,
            &DeploymentHints {
                provider: Some("aws".to_string()),
                framework: Some("django".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hinted.framework, Framework::Django);
    assert_eq!(hinted.port, 8000);

    // A hint naming the detected framework keeps the detected port
    let confirmed = engine
        .decide(
            &snapshot,
            &DeploymentHints {
                provider: Some("aws".to_string()),
                framework: Some("flask".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(confirmed.port, 5000);
}
