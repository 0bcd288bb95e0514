//! End-to-end pipeline tests with simulated provisioning and remote execution

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use launchpad::errors::ErrorKind;
use launchpad::models::adaptation::PatternKind;
use launchpad::models::request::{DeploymentHints, DeploymentRequest, RepoSource};
use launchpad::models::session::{DeploymentReport, RecordOutcome, Stage, StageStatus};
use launchpad::orchestrator::retry::StagePolicies;
use launchpad::provision::probe::AlwaysReachable;
use launchpad::utils::CooldownOptions;

use crate::common::{fast_policies, flask_archive, CountingTool, Harness, SwitchProbe};

fn request(harness: &Harness, provider: &str) -> DeploymentRequest {
    DeploymentRequest::new(RepoSource::Archive(flask_archive(harness.dir.path()))).with_hints(
        DeploymentHints {
            provider: Some(provider.to_string()),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_flask_deploys_end_to_end() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .start(request(&h, "aws"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Succeeded);
    let infra = session.infra.clone().unwrap();
    assert!(infra.ready);

    match session.report() {
        DeploymentReport::Succeeded(report) => {
            assert_eq!(report.url, format!("http://{}:5000", infra.public_address));
            assert_eq!(report.adapted_files, vec!["app.py".to_string()]);
            assert_eq!(report.resource_ids, infra.resource_ids);
            assert!(report.warnings.is_empty());
        }
        other => panic!("unexpected report: {:?}", other),
    }

    let adaptation = session.adaptation.clone().unwrap();
    let effective: Vec<_> = adaptation.effective_edits().collect();
    assert_eq!(effective.len(), 1);
    assert_eq!(effective[0].pattern, PatternKind::BindAddress);

    assert_eq!(h.tool.applies(), 1);
    assert!(session.workspace_cleaned);
    assert!(!session.snapshot.as_ref().unwrap().root.exists());
    assert!(h.remote.recorded().iter().any(|cmd| cmd.contains("PORT=5000")));

    // Persisted record matches the returned session
    let stored = h.store.load(&session.id).await.unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn test_unsupported_provider_fails_before_provisioning() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .start(request(&h, "azure"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Failed);
    let failure = session.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Deciding);
    assert_eq!(failure.kind, ErrorKind::UnsupportedProvider);
    assert_eq!(session.attempts(Stage::Deciding), 1);
    assert_eq!(h.tool.applies(), 0);
    assert!(session.infra.is_none());
}

#[tokio::test]
async fn test_provisioning_retries_exhausted() {
    let h = Harness::with(
        CountingTool::failing(u32::MAX),
        Arc::new(AlwaysReachable),
        Arc::new(AlwaysReachable),
    );
    let session = h
        .orchestrator
        .start(request(&h, "aws"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Failed);
    let failure = session.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Provisioning);
    assert_eq!(failure.kind, ErrorKind::ProvisioningApplyFailed);
    assert_eq!(failure.diagnostic, "Error: RequestLimitExceeded (apply 3)");
    assert_eq!(session.attempts(Stage::Provisioning), 3);
    assert_eq!(h.tool.applies(), 3);

    let failed_attempts = session
        .history
        .iter()
        .filter(|r| r.stage == Stage::Provisioning && r.outcome == RecordOutcome::Failed)
        .count();
    assert_eq!(failed_attempts, 3);
}

#[tokio::test]
async fn test_transient_provisioning_failure_recovers() {
    let h = Harness::with(
        CountingTool::failing(2),
        Arc::new(AlwaysReachable),
        Arc::new(AlwaysReachable),
    );
    let session = h
        .orchestrator
        .start(request(&h, "aws"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Succeeded);
    assert_eq!(session.attempts(Stage::Provisioning), 3);
    assert_eq!(h.tool.applies(), 3);
    assert!(session.failure.is_none());
}

#[tokio::test]
async fn test_resume_after_restart_does_not_reprovision() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let done = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();
    assert_eq!(done.stage, Stage::Succeeded);

    // Rewind to an interrupted adaptation
    let mut session = done.clone();
    session.stage = Stage::Adapting;
    session.adaptation = None;
    h.store.save(&session).await.unwrap();

    let tool = Arc::new(CountingTool::new());
    let orchestrator = h.restart(tool.clone());
    let resumed = orchestrator.resume(&session.id, &cancel).await.unwrap();

    assert_eq!(resumed.stage, Stage::Succeeded);
    assert_eq!(tool.applies(), 0);
    assert_eq!(resumed.infra, done.infra);
    assert_eq!(resumed.adaptation.unwrap().modified_files(), vec!["app.py".to_string()]);
    assert!(resumed.workspace_cleaned);
}

#[tokio::test]
async fn test_resume_of_terminal_session_is_a_no_op() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let done = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();

    let again = h.orchestrator.resume(&done.id, &cancel).await.unwrap();
    assert_eq!(again, done);
    assert_eq!(h.tool.applies(), 1);
}

#[tokio::test]
async fn test_unready_instance_is_a_warning() {
    let h = Harness::with(
        CountingTool::new(),
        Arc::new(SwitchProbe::default()),
        Arc::new(AlwaysReachable),
    );
    let session = h
        .orchestrator
        .start(request(&h, "aws"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Succeeded);
    assert!(!session.infra.as_ref().unwrap().ready);
    assert_eq!(session.warnings.len(), 1);
    assert_eq!(session.warnings[0].kind, ErrorKind::InfrastructureNotReady);
    assert_eq!(session.warnings[0].stage, Stage::Provisioning);
}

#[tokio::test]
async fn test_liveness_failure_reports_partial_resources() {
    let h = Harness::with(
        CountingTool::new(),
        Arc::new(AlwaysReachable),
        Arc::new(SwitchProbe::default()),
    );
    let session = h
        .orchestrator
        .start(request(&h, "aws"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.stage, Stage::Failed);
    match session.report() {
        DeploymentReport::Failed(report) => {
            assert_eq!(report.stage, Stage::Verifying);
            assert_eq!(report.kind, Some(ErrorKind::LivenessFailed));
            assert_eq!(report.partial_resource_ids.len(), 3);
            assert!(report.diagnostic.contains(":5000"));
        }
        other => panic!("unexpected report: {:?}", other),
    }
}

#[tokio::test]
async fn test_redeploy_reuses_infrastructure() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let first = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();
    assert_eq!(first.stage, Stage::Succeeded);

    let second = h.orchestrator.redeploy(&first.id, &cancel).await.unwrap();
    assert_eq!(second.stage, Stage::Succeeded);
    assert_eq!(second.infra, first.infra);
    assert_eq!(h.tool.applies(), 1);
    assert!(second
        .history
        .iter()
        .any(|r| r.stage == Stage::Provisioning && r.outcome == RecordOutcome::Skipped));
}

#[tokio::test]
async fn test_redeploy_of_running_session_is_rejected() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let done = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();

    let mut session = done.clone();
    session.stage = Stage::Deploying;
    h.store.save(&session).await.unwrap();

    let err = h.orchestrator.redeploy(&session.id, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_cancelled_session_fails() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let session = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();
    assert_eq!(session.stage, Stage::Failed);
    let failure = session.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.stage, Stage::Analyzing);
    assert_eq!(h.tool.applies(), 0);

    assert_eq!(session.progress(Stage::Analyzing).status, StageStatus::Failed);
    let last = session.history.last().unwrap();
    assert_eq!(last.stage, Stage::Analyzing);
    assert_eq!(last.outcome, RecordOutcome::Failed);
    assert_eq!(last.failure.as_ref().unwrap().kind, ErrorKind::Cancelled);

    let stored = h.store.load(&session.id).await.unwrap();
    assert_eq!(stored.history, session.history);
}

#[tokio::test]
async fn test_cancel_during_retry_wait() {
    let cancel = CancellationToken::new();
    let policies = StagePolicies {
        cooldown: CooldownOptions {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        },
        ..fast_policies()
    };
    let h = Harness::with_policies(
        CountingTool::failing(u32::MAX).cancelling(cancel.clone()),
        Arc::new(AlwaysReachable),
        Arc::new(AlwaysReachable),
        policies,
    );

    let session = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();
    assert_eq!(session.stage, Stage::Failed);
    let failure = session.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Provisioning);
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(h.tool.applies(), 1);
    assert_eq!(session.progress(Stage::Provisioning).status, StageStatus::Failed);

    let kinds: Vec<_> = session
        .history
        .iter()
        .filter(|r| r.stage == Stage::Provisioning && r.outcome == RecordOutcome::Failed)
        .map(|r| r.failure.as_ref().unwrap().kind)
        .collect();
    assert_eq!(kinds, vec![ErrorKind::ProvisioningApplyFailed, ErrorKind::Cancelled]);
    assert!(session.workspace_cleaned);
}

#[tokio::test]
async fn test_failed_attempt_recorded_once() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .start(request(&h, "azure"), &CancellationToken::new())
        .await
        .unwrap();

    let failed = session
        .history
        .iter()
        .filter(|r| r.stage == Stage::Deciding && r.outcome == RecordOutcome::Failed)
        .count();
    assert_eq!(failed, 1);
    assert_eq!(session.progress(Stage::Deciding).status, StageStatus::Failed);
}

#[tokio::test]
async fn test_resume_at_deploying_restores_adapted_workspace() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let done = h.orchestrator.start(request(&h, "aws"), &cancel).await.unwrap();
    assert!(!done.snapshot.as_ref().unwrap().root.exists());

    // Interrupted after adaptation, with the workspace already removed
    let mut session = done.clone();
    session.stage = Stage::Deploying;
    h.store.save(&session).await.unwrap();

    let tool = Arc::new(CountingTool::new());
    let orchestrator = h.restart(tool.clone());
    let resumed = orchestrator.resume(&session.id, &cancel).await.unwrap();

    assert_eq!(resumed.stage, Stage::Succeeded);
    assert_eq!(tool.applies(), 0);
    assert_eq!(resumed.infra, done.infra);
    assert_eq!(resumed.adaptation.as_ref().unwrap().modified_files(), vec!["app.py".to_string()]);
    assert_eq!(resumed.attempts(Stage::Deploying), done.attempts(Stage::Deploying) + 1);
    assert_eq!(resumed.attempts(Stage::Analyzing), done.attempts(Stage::Analyzing));
    assert!(resumed.workspace_cleaned);
    assert!(!resumed.snapshot.as_ref().unwrap().root.exists());
}

#[tokio::test]
async fn test_directory_source_fails_without_retry() {
    let h = Harness::new();
    let request = DeploymentRequest::new(RepoSource::Archive(h.dir.path().to_path_buf()));
    let session = h.orchestrator.start(request, &CancellationToken::new()).await.unwrap();

    assert_eq!(session.stage, Stage::Failed);
    let failure = session.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Analyzing);
    assert_eq!(failure.kind, ErrorKind::UnsupportedArchiveFormat);
    assert_eq!(session.attempts(Stage::Analyzing), 1);
}

#[tokio::test]
async fn test_concurrent_sessions_keep_separate_records() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        h.orchestrator.start(request(&h, "aws"), &cancel),
        h.orchestrator.start(request(&h, "aws"), &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.stage, Stage::Succeeded);
    assert_eq!(b.stage, Stage::Succeeded);
    assert_ne!(a.id, b.id);
    assert_ne!(a.infra.as_ref().unwrap().state_ref, b.infra.as_ref().unwrap().state_ref);
    assert_eq!(h.tool.applies(), 2);

    let ids: Vec<String> = h.store.list().await.unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.id) && ids.contains(&b.id));
}
