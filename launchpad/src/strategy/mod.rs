//! Deployment strategy selection
//!
//! `StrategyDecisionEngine::decide` is a pure function of the snapshot
//! signals and the user's hints. It never looks at workspace paths or clocks,
//! so the same repository content and hints always give an equal plan.

pub mod defaults;

use crate::analyzer::primary_manifest;
use crate::errors::DeployError;
use crate::models::framework::{Framework, Language};
use crate::models::plan::{DeploymentPlan, DeploymentStyle, LaunchCommands, Provider, SizeClass};
use crate::models::request::DeploymentHints;
use crate::models::snapshot::RepositorySnapshot;

use self::defaults::{defaults_for, entry_candidates};

/// Image tag used for containerized deployments
pub const CONTAINER_IMAGE: &str = "launchpad-app";

/// Resolve a provider hint
pub fn resolve_provider(hint: Option<&str>) -> Result<Provider, DeployError> {
    let Some(hint) = hint else {
        return Ok(Provider::Aws);
    };
    match hint.trim().to_lowercase().as_str() {
        "aws" | "amazon" | "ec2" => Ok(Provider::Aws),
        "gcp" | "google" | "gce" | "google cloud" => Ok(Provider::Gcp),
        _ => Err(DeployError::UnsupportedProvider(hint.to_string())),
    }
}

/// Maps repository signals and hints to a concrete plan
#[derive(Debug, Clone)]
pub struct StrategyDecisionEngine {
    ambiguity_margin: u32,
}

impl StrategyDecisionEngine {
    pub fn new(ambiguity_margin: u32) -> Self {
        Self { ambiguity_margin }
    }

    pub fn decide(
        &self,
        snapshot: &RepositorySnapshot,
        hints: &DeploymentHints,
    ) -> Result<DeploymentPlan, DeployError> {
        let provider = resolve_provider(hints.provider.as_deref())?;
        let framework = self.resolve_framework(snapshot, hints.framework.as_deref())?;
        let defaults = defaults_for(framework);

        let size = match hints.instance_size.as_deref() {
            Some(hint) => SizeClass::from_hint(hint).ok_or_else(|| {
                DeployError::InvalidRequest(format!("unknown instance size {}", hint))
            })?,
            None => defaults.size,
        };

        let region = hints
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| provider.default_region().to_string());

        // A detected port belongs to the detected framework
        let detection_agrees = hints.framework.is_none()
            || snapshot.top_candidate().is_some_and(|c| c.framework == framework);
        let port = snapshot
            .detected_port
            .filter(|_| detection_agrees)
            .unwrap_or(defaults.port);

        let style = if snapshot.container_descriptor.is_some() {
            DeploymentStyle::Containerized
        } else {
            DeploymentStyle::SingleVm
        };

        let launch = launch_commands(snapshot, framework, style, port);

        Ok(DeploymentPlan {
            provider,
            framework,
            runtime: framework.language(),
            style,
            size,
            port,
            region,
            launch,
        })
    }

    fn resolve_framework(
        &self,
        snapshot: &RepositorySnapshot,
        hint: Option<&str>,
    ) -> Result<Framework, DeployError> {
        if let Some(hint) = hint {
            return Framework::from_name(hint)
                .ok_or_else(|| DeployError::UnsupportedFramework(hint.to_string()));
        }

        let mut ranked = snapshot.candidates.iter();
        let Some(first) = ranked.next() else {
            return Err(DeployError::NoFrameworkDetected(
                "no framework markers, manifests or imports found".to_string(),
            ));
        };

        if let Some(second) = ranked.next() {
            if second.score > 0 && first.score - second.score < self.ambiguity_margin {
                return Err(DeployError::AmbiguousFramework {
                    first: first.framework.to_string(),
                    second: second.framework.to_string(),
                    first_score: first.score,
                    second_score: second.score,
                });
            }
        }

        Ok(first.framework)
    }
}

/// Directory holding the framework's manifest, relative to the repository root
fn app_workdir(snapshot: &RepositorySnapshot, language: Language) -> String {
    primary_manifest(snapshot, language)
        .and_then(|path| path.rsplit_once('/').map(|(dir, _)| dir.to_string()))
        .unwrap_or_else(|| ".".to_string())
}

/// Entry file for the framework inside `workdir`, relative to `workdir`
fn entry_file(snapshot: &RepositorySnapshot, framework: Framework, workdir: &str) -> Option<String> {
    let prefix = if workdir == "." {
        String::new()
    } else {
        format!("{}/", workdir)
    };

    entry_candidates(framework).iter().find_map(|name| {
        snapshot
            .entry_points
            .iter()
            .filter_map(|path| path.strip_prefix(prefix.as_str()))
            .find(|rel| rel.rsplit('/').next() == Some(*name))
            .map(str::to_string)
    })
}

fn has_manifest(snapshot: &RepositorySnapshot, workdir: &str, name: &str) -> bool {
    let path = if workdir == "." {
        name.to_string()
    } else {
        format!("{}/{}", workdir, name)
    };
    snapshot.manifests.contains(&path)
}

fn launch_commands(
    snapshot: &RepositorySnapshot,
    framework: Framework,
    style: DeploymentStyle,
    port: u16,
) -> LaunchCommands {
    if style == DeploymentStyle::Containerized {
        return container_commands(snapshot, port);
    }

    let workdir = app_workdir(snapshot, framework.language());
    let entry = entry_file(snapshot, framework, &workdir);

    let (install, build, start) = match framework.language() {
        Language::Python => {
            let mut install = vec!["python3 -m venv .venv".to_string()];
            if has_manifest(snapshot, &workdir, "requirements.txt") {
                install.push(".venv/bin/pip install -r requirements.txt".to_string());
            } else if has_manifest(snapshot, &workdir, "pyproject.toml")
                || has_manifest(snapshot, &workdir, "setup.py")
            {
                install.push(".venv/bin/pip install .".to_string());
            } else {
                install.push(format!(".venv/bin/pip install {}", framework.as_str()));
            }
            (install, Vec::new(), python_start(framework, entry.as_deref(), port))
        }
        Language::Nodejs => {
            let install = vec!["npm install".to_string()];
            let (build, start) = match framework {
                Framework::Nextjs => (
                    vec!["npm run build".to_string()],
                    format!("npx next start -H 0.0.0.0 -p {}", port),
                ),
                Framework::React => (
                    vec!["npm run build".to_string()],
                    format!("npx --yes serve -s build -l tcp://0.0.0.0:{}", port),
                ),
                Framework::Vue => (
                    vec!["npm run build".to_string()],
                    format!("npx --yes serve -s dist -l tcp://0.0.0.0:{}", port),
                ),
                _ => (
                    Vec::new(),
                    match entry.as_deref() {
                        Some(entry) => format!("node {}", entry),
                        None => "npm start".to_string(),
                    },
                ),
            };
            (install, build, start)
        }
        Language::Java => {
            if has_manifest(snapshot, &workdir, "build.gradle")
                || has_manifest(snapshot, &workdir, "build.gradle.kts")
            {
                (
                    Vec::new(),
                    vec!["./gradlew build -x test".to_string()],
                    format!("java -jar build/libs/*.jar --server.port={}", port),
                )
            } else {
                (
                    Vec::new(),
                    vec!["mvn -q package -DskipTests".to_string()],
                    format!("java -jar target/*.jar --server.port={}", port),
                )
            }
        }
        Language::Php => {
            let install = vec!["composer install --no-dev --no-interaction".to_string()];
            let start = match framework {
                Framework::Laravel => {
                    format!("php artisan serve --host=0.0.0.0 --port={}", port)
                }
                _ => format!("php -S 0.0.0.0:{} -t public", port),
            };
            (install, Vec::new(), start)
        }
    };

    LaunchCommands {
        workdir,
        install,
        build,
        start,
    }
}

fn python_start(framework: Framework, entry: Option<&str>, port: u16) -> String {
    match framework {
        Framework::Django => format!(".venv/bin/python manage.py runserver 0.0.0.0:{}", port),
        Framework::Fastapi => {
            let module = entry
                .map(|e| e.trim_end_matches(".py").replace('/', "."))
                .unwrap_or_else(|| "main".to_string());
            format!(
                ".venv/bin/python -m uvicorn {}:app --host 0.0.0.0 --port {}",
                module, port
            )
        }
        _ => format!(".venv/bin/python {}", entry.unwrap_or("app.py")),
    }
}

fn container_commands(snapshot: &RepositorySnapshot, port: u16) -> LaunchCommands {
    let is_compose = snapshot
        .container_descriptor
        .as_deref()
        .map(|d| d != "Dockerfile")
        .unwrap_or(false);

    if is_compose {
        return LaunchCommands {
            workdir: ".".to_string(),
            install: Vec::new(),
            build: vec!["docker compose build".to_string()],
            start: "docker compose up -d".to_string(),
        };
    }

    LaunchCommands {
        workdir: ".".to_string(),
        install: Vec::new(),
        build: vec![format!("docker build -t {} .", CONTAINER_IMAGE)],
        start: format!(
            "docker rm -f {image} >/dev/null 2>&1; docker run -d --name {image} --restart unless-stopped -e PORT={port} -p {port}:{port} {image}",
            image = CONTAINER_IMAGE,
            port = port
        ),
    }
}
