//! Component wiring and the command runners

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapt::CodeAdapter;
use crate::analyzer::RepositoryAnalyzer;
use crate::app::options::AppOptions;
use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::remote::{DryRunRemote, RemoteRunner, SshRemote};
use crate::errors::DeployError;
use crate::models::request::DeploymentRequest;
use crate::models::session::DeploymentSession;
use crate::orchestrator::{Components, Orchestrator};
use crate::provision::probe::{AlwaysReachable, HttpProbe, Probe, TcpProbe};
use crate::provision::tool::{DemoTool, ProvisioningTool, TerraformCli};
use crate::provision::InfrastructureProvisioner;
use crate::storage::sessions::SessionStore;
use crate::strategy::StrategyDecisionEngine;

/// Build the orchestrator and its components from options
pub fn build_orchestrator(options: &AppOptions) -> Result<Orchestrator, DeployError> {
    let (tool, remote, readiness, liveness): (
        Arc<dyn ProvisioningTool>,
        Arc<dyn RemoteRunner>,
        Arc<dyn Probe>,
        Arc<dyn Probe>,
    ) = if options.demo_mode {
        info!("Demo mode: provisioning and remote execution are simulated");
        (
            Arc::new(DemoTool),
            Arc::new(DryRunRemote::new()),
            Arc::new(AlwaysReachable),
            Arc::new(AlwaysReachable),
        )
    } else {
        (
            Arc::new(TerraformCli::new(
                options.tools.terraform_bin.clone(),
                options.tool_timeout(),
            )),
            Arc::new(SshRemote::new(
                options.tools.ssh_bin.clone(),
                options.tools.scp_bin.clone(),
                options.credential.clone(),
                options.remote_timeout(),
            )),
            Arc::new(TcpProbe),
            Arc::new(HttpProbe::new()?),
        )
    };

    let components = Components {
        analyzer: RepositoryAnalyzer::new(options.layout.workspaces_dir(), options.fetch_timeout())?,
        strategy: StrategyDecisionEngine::new(options.ambiguity_margin),
        provisioner: InfrastructureProvisioner::new(
            tool,
            readiness,
            options.layout.infra_dir(),
            options.provisioner.clone(),
        ),
        adapter: CodeAdapter::new(),
        executor: DeploymentExecutor::new(remote, liveness, options.executor.clone()),
    };

    let store = Arc::new(SessionStore::new(options.layout.sessions_dir()));
    Ok(Orchestrator::new(store, components, options.policies.clone()))
}

/// Cancel `token` once `shutdown_signal` resolves
fn cancel_on(
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal => {
                warn!("Shutdown requested, cancelling running sessions");
                child.cancel();
            }
            _ = child.cancelled() => {}
        }
    });
    token
}

/// Options matching the mode a session was started in
///
/// Demo sessions keep simulated collaborators on resume and redeploy, and
/// real sessions never fall back to simulation.
pub fn options_for_mode(options: &AppOptions, demo: bool) -> AppOptions {
    if options.demo_mode != demo {
        info!(
            "Session was started in {} mode, running it the same way",
            if demo { "demo" } else { "real" }
        );
    }
    AppOptions {
        demo_mode: demo,
        ..options.clone()
    }
}

/// Drop repeated ids, keeping the first occurrence of each
pub fn unique_ids(session_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    session_ids
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn session_store(options: &AppOptions) -> SessionStore {
    SessionStore::new(options.layout.sessions_dir())
}

/// Deploy one request in the configured mode
pub async fn run_deploy(
    options: &AppOptions,
    request: DeploymentRequest,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeploymentSession, DeployError> {
    let request = request.with_demo(options.demo_mode);
    let orchestrator = build_orchestrator(options)?;
    let cancel = cancel_on(shutdown_signal);
    let result = orchestrator.start(request, &cancel).await;
    cancel.cancel();
    result
}

/// Resume the given sessions concurrently, or every unfinished one
///
/// Each session runs in the mode it was started in. Results follow the order
/// of the unique ids.
pub async fn run_resume(
    options: &AppOptions,
    session_ids: Vec<String>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<Vec<Result<DeploymentSession, DeployError>>, DeployError> {
    let store = session_store(options);
    let ids = if session_ids.is_empty() {
        store
            .list()
            .await?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.id)
            .collect()
    } else {
        unique_ids(session_ids)
    };
    info!("Resuming {} session(s)", ids.len());

    let mut modes = Vec::with_capacity(ids.len());
    for id in &ids {
        modes.push(store.load(id).await.map(|s| s.request.demo));
    }
    let mut orchestrators = HashMap::new();
    for demo in modes.iter().filter_map(|mode| mode.as_ref().ok()) {
        if !orchestrators.contains_key(demo) {
            orchestrators.insert(*demo, build_orchestrator(&options_for_mode(options, *demo))?);
        }
    }

    let cancel = cancel_on(shutdown_signal);
    let results = join_all(ids.iter().zip(modes).map(|(id, mode)| {
        let orchestrators = &orchestrators;
        let cancel = &cancel;
        async move {
            let demo = mode?;
            match orchestrators.get(&demo) {
                Some(orchestrator) => orchestrator.resume(id, cancel).await,
                None => Err(DeployError::Internal(format!("no orchestrator for {}", id))),
            }
        }
    }))
    .await;
    cancel.cancel();
    Ok(results)
}

/// Redeploy a finished session in the mode it was started in
pub async fn run_redeploy(
    options: &AppOptions,
    session_id: &str,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeploymentSession, DeployError> {
    let session = session_store(options).load(session_id).await?;
    let orchestrator = build_orchestrator(&options_for_mode(options, session.request.demo))?;
    let cancel = cancel_on(shutdown_signal);
    let result = orchestrator.redeploy(session_id, &cancel).await;
    cancel.cancel();
    result
}

/// Result of a single environment check
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Check tool binaries and storage before a real run
pub async fn diagnose(options: &AppOptions) -> Vec<Check> {
    let mut checks = Vec::new();

    let tools = [
        ("terraform", &options.tools.terraform_bin),
        ("ssh", &options.tools.ssh_bin),
        ("scp", &options.tools.scp_bin),
    ];
    for (name, bin) in tools {
        let check = match find_on_path(bin) {
            Some(path) => Check {
                name: name.to_string(),
                ok: true,
                detail: path.display().to_string(),
            },
            None => Check {
                name: name.to_string(),
                ok: options.demo_mode,
                detail: format!("{} not found on PATH", bin),
            },
        };
        checks.push(check);
    }

    checks.push(Check {
        name: "credential".to_string(),
        ok: options.credential.is_some() || options.demo_mode,
        detail: if options.credential.is_some() {
            "ssh key configured".to_string()
        } else {
            "no ssh key configured; ssh falls back to its defaults".to_string()
        },
    });

    let storage = match check_storage(options).await {
        Ok(()) => Check {
            name: "storage".to_string(),
            ok: true,
            detail: options.layout.base_dir.display().to_string(),
        },
        Err(e) => Check {
            name: "storage".to_string(),
            ok: false,
            detail: e.to_string(),
        },
    };
    checks.push(storage);
    checks
}

async fn check_storage(options: &AppOptions) -> Result<(), DeployError> {
    options.layout.setup().await?;
    let probe = options
        .layout
        .sessions_dir()
        .file(&format!(".write-check-{}", uuid::Uuid::new_v4()));
    probe.write_atomic(b"ok").await?;
    probe.delete().await
}

fn find_on_path(bin: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(bin);
    if candidate.components().count() > 1 {
        return candidate.is_file().then_some(candidate);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|path| path.is_file())
}
