//! Shared fixtures: archives, fake collaborators and an orchestrator harness

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use launchpad::adapt::CodeAdapter;
use launchpad::analyzer::RepositoryAnalyzer;
use launchpad::deploy::executor::{DeploymentExecutor, ExecutorOptions};
use launchpad::deploy::remote::DryRunRemote;
use launchpad::errors::DeployError;
use launchpad::orchestrator::retry::StagePolicies;
use launchpad::orchestrator::{Components, Orchestrator};
use launchpad::provision::probe::{AlwaysReachable, Probe, ProbePolicy};
use launchpad::provision::template::TemplateSettings;
use launchpad::provision::tool::{DemoTool, ProvisioningTool, ToolOutputs};
use launchpad::provision::{InfrastructureProvisioner, ProvisionerOptions};
use launchpad::storage::layout::StorageLayout;
use launchpad::storage::sessions::SessionStore;
use launchpad::storage::settings::ProbeTarget;
use launchpad::strategy::StrategyDecisionEngine;
use launchpad::utils::CooldownOptions;

pub const FLASK_APP: &str = r#"from flask import Flask

app = Flask(__name__)


@app.route('/')
def hello():
    return 'Hello, World!'


if __name__ == '__main__':
    app.run(host='127.0.0.1', port=5000)
"#;

/// Write a zip archive with `files` under an optional top-level directory
pub fn write_zip(path: &Path, prefix: Option<&str>, files: &[(&str, &str)]) -> PathBuf {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        let name = match prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        };
        zip.start_file(name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

/// Flask hello-world archive in GitHub's `<repo>-main/` layout
pub fn flask_archive(dir: &Path) -> PathBuf {
    write_zip(
        &dir.join("hello-flask.zip"),
        Some("hello-flask-main"),
        &[
            ("app.py", FLASK_APP),
            ("requirements.txt", "flask==3.0.0\n"),
            ("README.md", "# hello\n"),
        ],
    )
}

/// Provisioning tool that delegates to `DemoTool` and counts calls
///
/// The first `fail_first` applies fail with a numbered diagnostic.
pub struct CountingTool {
    inner: DemoTool,
    pub plans: AtomicU32,
    pub applies: AtomicU32,
    fail_first: u32,
    cancel_on_failure: Option<CancellationToken>,
}

impl CountingTool {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(fail_first: u32) -> Self {
        Self {
            inner: DemoTool,
            plans: AtomicU32::new(0),
            applies: AtomicU32::new(0),
            fail_first,
            cancel_on_failure: None,
        }
    }

    /// Cancel `token` shortly after a failed apply, while the retry waits
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_failure = Some(token);
        self
    }

    pub fn applies(&self) -> u32 {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningTool for CountingTool {
    fn name(&self) -> &str {
        "counting"
    }

    async fn plan(&self, dir: &Path, cancel: &CancellationToken) -> Result<(), DeployError> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        self.inner.plan(dir, cancel).await
    }

    async fn apply(&self, dir: &Path, cancel: &CancellationToken) -> Result<ToolOutputs, DeployError> {
        let n = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            if let Some(token) = self.cancel_on_failure.clone() {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    token.cancel();
                });
            }
            return Err(DeployError::ProvisioningApplyFailed {
                diagnostic: format!("Error: RequestLimitExceeded (apply {})", n),
            });
        }
        self.inner.apply(dir, cancel).await
    }
}

/// Probe that fails until `reachable` is set
#[derive(Default)]
pub struct SwitchProbe {
    pub reachable: Mutex<bool>,
    pub calls: AtomicU32,
}

#[async_trait]
impl Probe for SwitchProbe {
    async fn check(&self, address: &str, port: u16) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.reachable.lock().unwrap() {
            Ok(())
        } else {
            Err(format!("connect {}:{}: connection refused", address, port))
        }
    }
}

/// Retry policy with millisecond backoff
pub fn fast_policies() -> StagePolicies {
    StagePolicies {
        cooldown: CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..StagePolicies::default()
    }
}

pub fn fast_probe_policy() -> ProbePolicy {
    ProbePolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        deadline: Duration::from_millis(50),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub layout: StorageLayout,
    pub tool: Arc<CountingTool>,
    pub remote: Arc<DryRunRemote>,
    pub store: Arc<SessionStore>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CountingTool::new(), Arc::new(AlwaysReachable), Arc::new(AlwaysReachable))
    }

    pub fn with(tool: CountingTool, readiness: Arc<dyn Probe>, liveness: Arc<dyn Probe>) -> Self {
        Self::with_policies(tool, readiness, liveness, fast_policies())
    }

    pub fn with_policies(
        tool: CountingTool,
        readiness: Arc<dyn Probe>,
        liveness: Arc<dyn Probe>,
        policies: StagePolicies,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("home"));
        let tool = Arc::new(tool);
        let remote = Arc::new(DryRunRemote::new());

        let components = Components {
            analyzer: RepositoryAnalyzer::new(layout.workspaces_dir(), Duration::from_secs(30))
                .unwrap(),
            strategy: StrategyDecisionEngine::new(2),
            provisioner: InfrastructureProvisioner::new(
                tool.clone(),
                readiness,
                layout.infra_dir(),
                ProvisionerOptions {
                    template: TemplateSettings {
                        ssh_port: 22,
                        ..TemplateSettings::default()
                    },
                    readiness: fast_probe_policy(),
                    readiness_target: ProbeTarget::RemoteAccess,
                },
            ),
            adapter: CodeAdapter::new(),
            executor: DeploymentExecutor::new(
                remote.clone(),
                liveness,
                ExecutorOptions {
                    liveness: fast_probe_policy(),
                    ..ExecutorOptions::default()
                },
            ),
        };

        let store = Arc::new(SessionStore::new(layout.sessions_dir()));
        let orchestrator = Orchestrator::new(store.clone(), components, policies);
        Self {
            dir,
            layout,
            tool,
            remote,
            store,
            orchestrator,
        }
    }

    /// Fresh orchestrator over the same storage, as after a process restart
    pub fn restart(&self, tool: Arc<CountingTool>) -> Orchestrator {
        let components = Components {
            analyzer: RepositoryAnalyzer::new(self.layout.workspaces_dir(), Duration::from_secs(30))
                .unwrap(),
            strategy: StrategyDecisionEngine::new(2),
            provisioner: InfrastructureProvisioner::new(
                tool,
                Arc::new(AlwaysReachable),
                self.layout.infra_dir(),
                ProvisionerOptions {
                    template: TemplateSettings {
                        ssh_port: 22,
                        ..TemplateSettings::default()
                    },
                    readiness: fast_probe_policy(),
                    readiness_target: ProbeTarget::RemoteAccess,
                },
            ),
            adapter: CodeAdapter::new(),
            executor: DeploymentExecutor::new(
                self.remote.clone(),
                Arc::new(AlwaysReachable),
                ExecutorOptions {
                    liveness: fast_probe_policy(),
                    ..ExecutorOptions::default()
                },
            ),
        };
        Orchestrator::new(
            Arc::new(SessionStore::new(self.layout.sessions_dir())),
            components,
            fast_policies(),
        )
    }
}
