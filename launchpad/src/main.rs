//! Launchpad - Entry Point
//!
//! Deploys a source repository to a cloud virtual machine and reports the
//! public URL it is served on.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use launchpad::app::options::AppOptions;
use launchpad::app::run::{build_orchestrator, diagnose, run_deploy, run_redeploy, run_resume};
use launchpad::filesys::file::File;
use launchpad::logs::{init_logging, LogLevel, LogOptions};
use launchpad::models::request::{DeploymentHints, DeploymentRequest, RepoSource};
use launchpad::models::session::{DeploymentReport, DeploymentSession};
use launchpad::storage::layout::StorageLayout;
use launchpad::storage::settings::Settings;
use launchpad::utils::version_info;

#[derive(Parser)]
#[command(name = "launchpad", about = "Deploy a repository to the cloud", version)]
struct Cli {
    /// Settings file; defaults to settings.json in the launchpad home
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a repository archive or URL
    Deploy {
        /// Archive path, archive URL or GitHub repository URL
        repository: String,

        /// Cloud provider (aws, gcp)
        #[arg(long)]
        provider: Option<String>,

        /// Framework, skipping detection
        #[arg(long)]
        framework: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Size class (micro, small, medium, large) or instance type
        #[arg(long)]
        size: Option<String>,

        /// Free-text description recorded with the session
        #[arg(long, default_value = "")]
        description: String,

        /// Simulate provisioning and remote execution
        #[arg(long)]
        demo: bool,
    },

    /// Continue unfinished sessions
    Resume {
        /// Session ids; every unfinished session when omitted
        session_ids: Vec<String>,
    },

    /// Run a finished session again
    Redeploy { session_id: String },

    /// Show a session's report
    Status { session_id: String },

    /// List sessions
    List,

    /// Check tool binaries and storage
    Diagnose,

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::Version = cli.command {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(ExitCode::SUCCESS);
    }

    let layout = StorageLayout::default();
    let settings_file = cli
        .config
        .clone()
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let mut settings = Settings::load_or_default(&settings_file).await?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if let Command::Deploy { demo: true, .. } = cli.command {
        settings.demo_mode = true;
    }

    layout
        .setup()
        .await
        .with_context(|| format!("unable to prepare {}", layout.base_dir.display()))?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(LogOptions {
        log_level: settings.log_level,
        stderr: true,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        json_format: settings.log_json,
    })?;

    let options = AppOptions::from_settings(&settings, layout);
    info!("launchpad {} (home {})", env!("CARGO_PKG_VERSION"), options.layout.base_dir.display());

    match cli.command {
        Command::Version => Ok(ExitCode::SUCCESS),

        Command::Diagnose => {
            let checks = diagnose(&options).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    let mark = if check.ok { "ok".green() } else { "missing".red() };
                    println!("{:<12} {:<8} {}", check.name, mark, check.detail);
                }
            }
            Ok(exit_code(checks.iter().all(|c| c.ok)))
        }

        Command::Deploy {
            repository,
            provider,
            framework,
            region,
            size,
            description,
            demo: _,
        } => {
            let request = DeploymentRequest::new(RepoSource::parse(&repository)?)
                .with_hints(DeploymentHints {
                    provider,
                    framework,
                    region,
                    instance_size: size,
                })
                .with_description(description);
            let session = run_deploy(&options, request, await_shutdown_signal()).await?;
            Ok(exit_code(print_report(&session, cli.json)?))
        }

        Command::Resume { session_ids } => {
            let results = run_resume(&options, session_ids, await_shutdown_signal()).await?;
            let mut all_ok = true;
            for result in results {
                match result {
                    Ok(session) => all_ok &= print_report(&session, cli.json)?,
                    Err(e) => {
                        all_ok = false;
                        eprintln!("{} {}", "error:".red().bold(), e);
                    }
                }
            }
            Ok(exit_code(all_ok))
        }

        Command::Redeploy { session_id } => {
            let session = run_redeploy(&options, &session_id, await_shutdown_signal()).await?;
            Ok(exit_code(print_report(&session, cli.json)?))
        }

        Command::Status { session_id } => {
            let orchestrator = build_orchestrator(&options)?;
            let session = orchestrator.store().load(&session_id).await?;
            Ok(exit_code(print_report(&session, cli.json)?))
        }

        Command::List => {
            let orchestrator = build_orchestrator(&options)?;
            let sessions = orchestrator.store().list().await?;
            if cli.json {
                let reports: Vec<DeploymentReport> = sessions.iter().map(|s| s.report()).collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for session in &sessions {
                    println!(
                        "{}  {:<12} {}  {}",
                        session.id,
                        session.stage.to_string(),
                        session.created_at.format("%Y-%m-%d %H:%M:%S"),
                        session.request.repository
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print a session's report; true when the session succeeded
fn print_report(session: &DeploymentSession, json: bool) -> Result<bool> {
    let report = session.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let ok = match &report {
        DeploymentReport::Succeeded(success) => {
            if !json {
                println!("{} {}", "Deployed".green().bold(), success.url.bold());
                println!("  session    {}", success.session_id);
                println!("  resources  {}", success.resource_ids.join(", "));
                if !success.adapted_files.is_empty() {
                    println!("  adapted    {}", success.adapted_files.join(", "));
                }
                for (stage, ms) in &success.stage_timings_ms {
                    println!("  {:<10} {} ms", stage.to_string(), ms);
                }
                for warning in &success.warnings {
                    println!("  {} {}: {}", "warning".yellow(), warning.stage, warning.message);
                }
            }
            true
        }
        DeploymentReport::Failed(failure) => {
            if !json {
                println!("{} at {}", "Failed".red().bold(), failure.stage);
                println!("  session    {}", failure.session_id);
                if let Some(kind) = failure.kind {
                    println!("  kind       {}", serde_json::to_string(&kind)?.trim_matches('"'));
                }
                if !failure.partial_resource_ids.is_empty() {
                    println!("  resources  {}", failure.partial_resource_ids.join(", "));
                }
                println!("{}", failure.diagnostic);
            }
            false
        }
        DeploymentReport::InProgress { session_id, stage } => {
            if !json {
                println!("{} {} at {}", "In progress".yellow().bold(), session_id, stage);
            }
            false
        }
    };
    Ok(ok)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers");
                    std::future::pending::<()>().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling...");
        }
    }
}
