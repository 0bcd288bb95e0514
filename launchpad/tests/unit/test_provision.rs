//! Provisioner tests with the simulated tool

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use launchpad::errors::DeployError;
use launchpad::filesys::dir::Dir;
use launchpad::models::framework::{Framework, Language};
use launchpad::models::plan::{DeploymentPlan, DeploymentStyle, LaunchCommands, Provider, SizeClass};
use launchpad::provision::probe::{AlwaysReachable, Probe};
use launchpad::provision::template::TemplateSettings;
use launchpad::provision::{InfrastructureProvisioner, ProvisionerOptions};
use launchpad::storage::settings::ProbeTarget;

use crate::common::{fast_probe_policy, CountingTool, SwitchProbe};

fn plan() -> DeploymentPlan {
    DeploymentPlan {
        provider: Provider::Aws,
        framework: Framework::Flask,
        runtime: Language::Python,
        style: DeploymentStyle::SingleVm,
        size: SizeClass::Micro,
        port: 5000,
        region: "us-east-1".to_string(),
        launch: LaunchCommands {
            workdir: ".".to_string(),
            install: vec!["pip install -r requirements.txt".to_string()],
            build: vec![],
            start: "python app.py".to_string(),
        },
    }
}

fn provisioner(
    dir: &std::path::Path,
    tool: Arc<CountingTool>,
    probe: Arc<dyn Probe>,
) -> InfrastructureProvisioner {
    InfrastructureProvisioner::new(
        tool,
        probe,
        Dir::new(dir.join("infra")),
        ProvisionerOptions {
            template: TemplateSettings {
                ssh_port: 22,
                ..TemplateSettings::default()
            },
            readiness: fast_probe_policy(),
            readiness_target: ProbeTarget::RemoteAccess,
        },
    )
}

#[tokio::test]
async fn test_reprovision_reuses_resources() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(CountingTool::new());
    let provisioner = provisioner(dir.path(), tool.clone(), Arc::new(AlwaysReachable));
    let cancel = CancellationToken::new();

    let first = provisioner.provision(&plan(), None, "s1", &cancel).await.unwrap();
    assert!(first.ready);
    assert_eq!(first.resource_ids.len(), 3);
    assert!(first.state_ref.dir().join("main.tf").exists());

    let second = provisioner
        .provision(&plan(), Some(&first), "ignored", &cancel)
        .await
        .unwrap();
    assert_eq!(second.state_ref, first.state_ref);
    assert_eq!(second.instance_id, first.instance_id);
    assert_eq!(second.resource_ids, first.resource_ids);
    assert_eq!(second.template_digest, first.template_digest);
    assert_eq!(tool.applies(), 2);
    assert_eq!(tool.plans.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_instance_keeps_handles() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(SwitchProbe::default());
    let provisioner = provisioner(dir.path(), Arc::new(CountingTool::new()), probe.clone());

    let err = provisioner
        .provision(&plan(), None, "s1", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        DeployError::InfrastructureNotReady { reason, partial } => {
            assert!(reason.contains(":22 unreachable"));
            assert!(!partial.ready);
            assert!(partial.instance_id.starts_with("i-"));
            assert_eq!(partial.resource_ids.len(), 3);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(probe.calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_apply_failure_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(CountingTool::failing(1));
    let provisioner = provisioner(dir.path(), tool.clone(), Arc::new(AlwaysReachable));
    let cancel = CancellationToken::new();

    let err = provisioner.provision(&plan(), None, "s1", &cancel).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.diagnostic().contains("RequestLimitExceeded (apply 1)"));

    let infra = provisioner.provision(&plan(), None, "s1", &cancel).await.unwrap();
    assert!(infra.ready);
}

#[tokio::test]
async fn test_cancelled_before_apply() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(CountingTool::new());
    let provisioner = provisioner(dir.path(), tool.clone(), Arc::new(AlwaysReachable));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = provisioner.provision(&plan(), None, "s1", &cancel).await.unwrap_err();
    assert!(matches!(err, DeployError::Cancelled));
    assert_eq!(tool.applies(), 0);
}
