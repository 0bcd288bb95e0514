//! Deployment executor

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::deploy::remote::{RemoteRunner, RemoteTarget};
use crate::errors::DeployError;
use crate::models::infra::ProvisionedInfrastructure;
use crate::models::plan::{DeploymentPlan, DeploymentStyle};
use crate::models::snapshot::RepositorySnapshot;
use crate::provision::probe::{wait_until_ready, Probe, ProbeFailure, ProbePolicy};
use crate::storage::settings::ProbeTarget;
use crate::strategy::CONTAINER_IMAGE;

/// Bundle file name inside the workspace
pub const BUNDLE_FILE: &str = ".launchpad-bundle.tar.gz";

/// Directories never shipped to the remote machine
const BUNDLE_EXCLUDES: [&str; 4] = [".git", "node_modules", ".venv", "__pycache__"];

/// Lines of application log attached to a liveness failure
const LOG_TAIL_LINES: u32 = 20;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Login user; the provider's image default when unset
    pub remote_user: Option<String>,
    pub ssh_port: u16,
    pub app_dir: String,
    pub liveness: ProbePolicy,
    pub liveness_target: ProbeTarget,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            remote_user: None,
            ssh_port: 22,
            app_dir: "/opt/app".to_string(),
            liveness: ProbePolicy::default(),
            liveness_target: ProbeTarget::ApplicationPort,
        }
    }
}

/// Ships the adapted repository and starts it on the provisioned machine
pub struct DeploymentExecutor {
    remote: Arc<dyn RemoteRunner>,
    probe: Arc<dyn Probe>,
    options: ExecutorOptions,
}

impl DeploymentExecutor {
    pub fn new(remote: Arc<dyn RemoteRunner>, probe: Arc<dyn Probe>, options: ExecutorOptions) -> Self {
        Self {
            remote,
            probe,
            options,
        }
    }

    fn target(&self, infra: &ProvisionedInfrastructure) -> RemoteTarget {
        RemoteTarget {
            address: infra.public_address.clone(),
            user: self
                .options
                .remote_user
                .clone()
                .unwrap_or_else(|| infra.provider.default_remote_user().to_string()),
            port: self.options.ssh_port,
        }
    }

    /// Directory the launch commands run in
    fn run_dir(&self, plan: &DeploymentPlan) -> String {
        let workdir = plan.launch.workdir.trim_matches('/');
        if workdir.is_empty() || workdir == "." {
            self.options.app_dir.clone()
        } else {
            format!("{}/{}", self.options.app_dir.trim_end_matches('/'), workdir)
        }
    }

    /// Transfer, install and start the application
    pub async fn deploy(
        &self,
        snapshot: &RepositorySnapshot,
        plan: &DeploymentPlan,
        infra: &ProvisionedInfrastructure,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let target = self.target(infra);
        let run_dir = self.run_dir(plan);

        let bundle = build_bundle(snapshot.root.clone(), snapshot.workspace.join(BUNDLE_FILE)).await?;
        let remote_bundle = format!("/tmp/launchpad-{}.tar.gz", snapshot.digest.get(..12).unwrap_or("bundle"));

        info!("Transferring {} to {}", snapshot.root.display(), target);
        let upload = self.remote.upload(&target, &bundle, &remote_bundle, cancel).await;
        // The bundle is rebuilt on every attempt
        if let Err(e) = tokio::fs::remove_file(&bundle).await {
            debug!("Unable to remove bundle {}: {}", bundle.display(), e);
        }
        let upload = upload?;
        if !upload.ok {
            return Err(DeployError::TransferFailed(upload.diagnostic()));
        }

        let unpack = self
            .remote
            .exec(&target, &unpack_script(&self.options.app_dir, &remote_bundle), cancel)
            .await?;
        if !unpack.ok {
            return Err(DeployError::TransferFailed(unpack.diagnostic()));
        }

        let steps: Vec<&String> = plan.launch.install.iter().chain(plan.launch.build.iter()).collect();
        if !steps.is_empty() {
            info!("Installing dependencies ({} step(s))", steps.len());
            let install = self.remote.exec(&target, &steps_script(&run_dir, &steps), cancel).await?;
            if !install.ok {
                let mut output = install.stdout.clone();
                if !install.stderr.is_empty() {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&install.stderr);
                }
                return Err(DeployError::DependencyInstallFailed { output });
            }
        }

        let script = match plan.style {
            DeploymentStyle::SingleVm => background_script(&run_dir, &plan.launch.start, plan.port),
            DeploymentStyle::Containerized => steps_script(&run_dir, &[&plan.launch.start]),
        };
        info!("Starting {} on port {}", plan.framework, plan.port);
        let start = self.remote.exec(&target, &script, cancel).await?;
        if !start.ok {
            return Err(DeployError::StartupFailed(start.diagnostic()));
        }

        Ok(())
    }

    /// Poll the application port until it answers
    pub async fn verify(
        &self,
        plan: &DeploymentPlan,
        infra: &ProvisionedInfrastructure,
        cancel: &CancellationToken,
    ) -> Result<u32, DeployError> {
        let port = match self.options.liveness_target {
            ProbeTarget::ApplicationPort => plan.port,
            ProbeTarget::RemoteAccess => self.options.ssh_port,
        };
        match wait_until_ready(
            self.probe.as_ref(),
            &infra.public_address,
            port,
            &self.options.liveness,
            cancel,
        )
        .await
        {
            Ok(attempts) => {
                info!("{}:{} live after {} probe(s)", infra.public_address, port, attempts);
                Ok(attempts)
            }
            Err(ProbeFailure::Cancelled) => Err(DeployError::Cancelled),
            Err(ProbeFailure::Deadline {
                attempts,
                last_error,
            }) => {
                let mut message = format!(
                    "{}:{} unreachable after {} probe(s): {}",
                    infra.public_address, port, attempts, last_error
                );
                if let Some(tail) = self.log_tail(plan, infra, cancel).await {
                    message.push_str("\n--- application log ---\n");
                    message.push_str(&tail);
                }
                Err(DeployError::LivenessFailed(message))
            }
        }
    }

    /// Best effort; a failure here must not mask the liveness error
    async fn log_tail(
        &self,
        plan: &DeploymentPlan,
        infra: &ProvisionedInfrastructure,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let script = log_tail_script(plan, &self.run_dir(plan));
        match self.remote.exec(&self.target(infra), &script, cancel).await {
            Ok(output) if output.ok && !output.stdout.is_empty() => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                warn!("Unable to read application log: {}", e);
                None
            }
        }
    }
}

/// Shell command printing the last application log lines
///
/// Compose projects are read from their run directory, since their
/// containers carry compose-assigned names.
fn log_tail_script(plan: &DeploymentPlan, run_dir: &str) -> String {
    match plan.style {
        DeploymentStyle::SingleVm => {
            format!("tail -n {} {}/app.log", LOG_TAIL_LINES, shell_quote(run_dir))
        }
        DeploymentStyle::Containerized if plan.launch.start.starts_with("docker compose") => format!(
            "cd {} && docker compose logs --no-color --tail {} 2>&1",
            shell_quote(run_dir),
            LOG_TAIL_LINES
        ),
        DeploymentStyle::Containerized => {
            format!("docker logs --tail {} {} 2>&1", LOG_TAIL_LINES, CONTAINER_IMAGE)
        }
    }
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn unpack_script(app_dir: &str, remote_bundle: &str) -> String {
    let app_dir = shell_quote(app_dir);
    let bundle = shell_quote(remote_bundle);
    format!(
        "set -e\n\
         sudo mkdir -p {app}\n\
         sudo chown \"$(id -un)\" {app}\n\
         tar -xzf {bundle} -C {app}\n\
         rm -f {bundle}\n",
        app = app_dir,
        bundle = bundle
    )
}

fn steps_script(run_dir: &str, steps: &[&String]) -> String {
    let mut script = format!("set -e\ncd {}\n", shell_quote(run_dir));
    for step in steps {
        script.push_str(step);
        script.push('\n');
    }
    script
}

/// Replace any previous instance and detach the new one
fn background_script(run_dir: &str, start: &str, port: u16) -> String {
    format!(
        "set -e\n\
         cd {dir}\n\
         if [ -f app.pid ]; then kill \"$(cat app.pid)\" 2>/dev/null || true; fi\n\
         PORT={port} nohup sh -c {start} > app.log 2>&1 &\n\
         echo $! > app.pid\n\
         sleep 2\n\
         if ! kill -0 \"$(cat app.pid)\" 2>/dev/null; then tail -n {tail} app.log >&2; exit 1; fi\n",
        dir = shell_quote(run_dir),
        port = port,
        start = shell_quote(start),
        tail = LOG_TAIL_LINES
    )
}

/// Write a gzipped tarball of `root` to `dest`
pub async fn build_bundle(root: PathBuf, dest: PathBuf) -> Result<PathBuf, DeployError> {
    tokio::task::spawn_blocking(move || write_bundle(&root, &dest).map(|_| dest))
        .await
        .map_err(|e| DeployError::Internal(format!("bundle task failed: {}", e)))?
}

fn write_bundle(root: &Path, dest: &Path) -> Result<(), DeployError> {
    let file = fs::File::create(dest)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && BUNDLE_EXCLUDES.contains(&name.as_ref()))
                && entry.path() != dest
        });

    let mut count = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| DeployError::TransferFailed(e.to_string()))?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        if entry.file_type().is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), rel)?;
            count += 1;
        }
    }

    builder.into_inner()?.finish()?;
    debug!("Bundled {} file(s) into {}", count, dest.display());
    Ok(())
}
