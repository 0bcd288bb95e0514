//! Code adapter tests against a real workspace

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use launchpad::adapt::{partial_failure, CodeAdapter};
use launchpad::analyzer::RepositoryAnalyzer;
use launchpad::errors::DeployError;
use launchpad::filesys::dir::Dir;
use launchpad::models::adaptation::PatternKind;
use launchpad::models::infra::{ProvisionedInfrastructure, StateRef};
use launchpad::models::plan::Provider;
use launchpad::models::request::{DeploymentRequest, RepoSource};

use crate::common::{flask_archive, write_zip};

fn infra() -> ProvisionedInfrastructure {
    ProvisionedInfrastructure {
        provider: Provider::Aws,
        instance_id: "i-0123456789abcdef0".to_string(),
        public_address: "203.0.113.7".to_string(),
        resource_ids: vec!["i-0123456789abcdef0".to_string()],
        state_ref: StateRef::new("session", "/tmp/infra/session"),
        template_digest: String::new(),
        ready: true,
        provisioned_at: Utc::now(),
    }
}

async fn analyze(archive: std::path::PathBuf, workspaces: std::path::PathBuf) -> launchpad::models::snapshot::RepositorySnapshot {
    RepositoryAnalyzer::new(Dir::new(workspaces), Duration::from_secs(30))
        .unwrap()
        .analyze(
            &DeploymentRequest::new(RepoSource::Archive(archive)),
            "adapt",
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_flask_bind_rewritten_once() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = analyze(flask_archive(dir.path()), dir.path().join("ws")).await;
    let adapter = CodeAdapter::new();

    let first = adapter.adapt(&snapshot, &infra()).await;
    assert!(!first.is_partial());
    let effective: Vec<_> = first.effective_edits().collect();
    assert_eq!(effective.len(), 1);
    assert_eq!(effective[0].pattern, PatternKind::BindAddress);
    assert_eq!(first.modified_files(), vec!["app.py".to_string()]);

    let source = std::fs::read_to_string(snapshot.root.join("app.py")).unwrap();
    assert!(source.contains("app.run(host='0.0.0.0', port=5000)"));

    // A second pass finds only the adapted forms
    let second = adapter.adapt(&snapshot, &infra()).await;
    assert_eq!(second.effective_edits().count(), 0);
    assert_eq!(second.edits.len(), first.edits.len());
    assert!(second.edits.iter().all(|e| e.is_zero_effect()));
    assert_eq!(std::fs::read_to_string(snapshot.root.join("app.py")).unwrap(), source);
}

#[tokio::test]
async fn test_config_urls_point_at_public_address() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(
        &dir.path().join("node.zip"),
        None,
        &[
            ("package.json", r#"{"dependencies": {"express": "4"}}"#),
            (
                "server.js",
                "const express = require('express');\nconst app = express();\napp.listen(3000, 'localhost');\n",
            ),
            (".env", "API_URL=http://localhost:3000/api\nCACHE=localhost:6379\n"),
        ],
    );
    let snapshot = analyze(archive, dir.path().join("ws")).await;

    let result = CodeAdapter::new().adapt(&snapshot, &infra()).await;
    assert_eq!(result.modified_files(), vec![".env".to_string(), "server.js".to_string()]);

    let env = std::fs::read_to_string(snapshot.root.join(".env")).unwrap();
    assert_eq!(env, "API_URL=http://203.0.113.7:3000/api\nCACHE=203.0.113.7:6379\n");
    let server = std::fs::read_to_string(snapshot.root.join("server.js")).unwrap();
    assert!(server.contains("app.listen(3000, '0.0.0.0');"));
}

#[tokio::test]
async fn test_unreadable_file_is_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = analyze(flask_archive(dir.path()), dir.path().join("ws")).await;
    std::fs::remove_file(snapshot.root.join("app.py")).unwrap();

    let result = CodeAdapter::new().adapt(&snapshot, &infra()).await;
    assert!(result.is_partial());
    assert_eq!(result.failures[0].file, "app.py");
    let err = partial_failure(&result).unwrap();
    assert!(matches!(err, DeployError::AdaptationPartialFailure { ref files } if files == &vec!["app.py".to_string()]));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_test_sources_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = "import requests\nBASE = 'http://localhost:5000/api'\n";
    let archive = write_zip(
        &dir.path().join("suite.zip"),
        None,
        &[
            ("requirements.txt", "flask\n"),
            ("app.py", "from flask import Flask\napp = Flask(__name__)\napp.run(host='127.0.0.1', port=5000)\n"),
            ("tests/app.py", fixture),
            ("tests/.env", "API_URL=http://localhost:5000\n"),
        ],
    );
    let snapshot = analyze(archive, dir.path().join("ws")).await;
    assert_eq!(snapshot.adaptation_targets(), vec!["app.py".to_string()]);

    let result = CodeAdapter::new().adapt(&snapshot, &infra()).await;
    assert_eq!(result.modified_files(), vec!["app.py".to_string()]);
    assert_eq!(std::fs::read_to_string(snapshot.root.join("tests/app.py")).unwrap(), fixture);
}
