//! Deployment session aggregate

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DeployError, ErrorCategory, ErrorKind};
use crate::models::adaptation::AdaptationResult;
use crate::models::infra::ProvisionedInfrastructure;
use crate::models::plan::DeploymentPlan;
use crate::models::request::DeploymentRequest;
use crate::models::snapshot::RepositorySnapshot;

/// Current on-disk schema version; readers accept older records
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Analyzing,
    Deciding,
    Provisioning,
    Adapting,
    Deploying,
    Verifying,
    Succeeded,
    Failed,
}

impl Stage {
    /// Working stages in execution order
    pub const PIPELINE: [Stage; 6] = [
        Stage::Analyzing,
        Stage::Deciding,
        Stage::Provisioning,
        Stage::Adapting,
        Stage::Deploying,
        Stage::Verifying,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analyzing => "analyzing",
            Stage::Deciding => "deciding",
            Stage::Provisioning => "provisioning",
            Stage::Adapting => "adapting",
            Stage::Deploying => "deploying",
            Stage::Verifying => "verifying",
            Stage::Succeeded => "succeeded",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Retried,
}

/// Per-stage bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    #[serde(default)]
    pub status: StageStatus,

    /// Attempts started so far; never decreases
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall time spent across all attempts
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// A failure or degraded result raised by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
    pub diagnostic: String,
}

impl StageFailure {
    pub fn from_error(stage: Stage, err: &DeployError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            category: err.category(),
            message: err.to_string(),
            diagnostic: err.diagnostic(),
        }
    }
}

/// What happened in a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOutcome {
    Started,
    Succeeded,
    Skipped,
    Warning,
    Failed,
}

/// Append-only history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub attempt: u32,
    pub outcome: RecordOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// The orchestrator's persisted state for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSession {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub id: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub request: DeploymentRequest,

    pub stage: Stage,

    #[serde(default)]
    pub stages: BTreeMap<Stage, StageProgress>,

    #[serde(default)]
    pub history: Vec<StageRecord>,

    #[serde(default)]
    pub snapshot: Option<RepositorySnapshot>,

    #[serde(default)]
    pub plan: Option<DeploymentPlan>,

    /// Plan the current infrastructure was provisioned from
    #[serde(default)]
    pub provisioned_plan: Option<DeploymentPlan>,

    #[serde(default)]
    pub infra: Option<ProvisionedInfrastructure>,

    #[serde(default)]
    pub adaptation: Option<AdaptationResult>,

    /// Partial-success conditions carried forward to the report
    #[serde(default)]
    pub warnings: Vec<StageFailure>,

    #[serde(default)]
    pub failure: Option<StageFailure>,

    #[serde(default)]
    pub workspace_cleaned: bool,
}

fn default_schema_version() -> u32 {
    1
}

impl DeploymentSession {
    /// Create a session at the first stage
    pub fn new(request: DeploymentRequest) -> Self {
        let now = Utc::now();
        let stages = Stage::PIPELINE
            .iter()
            .map(|stage| (*stage, StageProgress::default()))
            .collect();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            request,
            stage: Stage::Analyzing,
            stages,
            history: Vec::new(),
            snapshot: None,
            plan: None,
            provisioned_plan: None,
            infra: None,
            adaptation: None,
            warnings: Vec::new(),
            failure: None,
            workspace_cleaned: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn progress(&self, stage: Stage) -> StageProgress {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    pub fn attempts(&self, stage: Stage) -> u32 {
        self.progress(stage).attempts
    }

    /// Start a new attempt of `stage` and return its 1-based number
    pub fn begin_attempt(&mut self, stage: Stage) -> u32 {
        let now = Utc::now();
        let progress = self.stages.entry(stage).or_default();
        progress.attempts += 1;
        progress.started_at.get_or_insert(now);
        let attempt = progress.attempts;
        self.push_record(stage, attempt, RecordOutcome::Started, None, None);
        attempt
    }

    /// Mark `stage` succeeded and store its elapsed time
    pub fn record_success(&mut self, stage: Stage, elapsed_ms: u64, note: Option<String>) {
        let progress = self.stages.entry(stage).or_default();
        progress.status = StageStatus::Succeeded;
        progress.finished_at = Some(Utc::now());
        progress.elapsed_ms += elapsed_ms;
        let attempt = progress.attempts;
        self.push_record(stage, attempt, RecordOutcome::Succeeded, None, note);
    }

    /// Mark `stage` done without running it
    pub fn record_skipped(&mut self, stage: Stage, note: impl Into<String>) {
        let progress = self.stages.entry(stage).or_default();
        progress.status = StageStatus::Succeeded;
        progress.finished_at = Some(Utc::now());
        let attempt = progress.attempts;
        self.push_record(stage, attempt, RecordOutcome::Skipped, None, Some(note.into()));
    }

    /// Record a degraded but usable result
    pub fn record_warning(&mut self, stage: Stage, err: &DeployError) {
        let failure = StageFailure::from_error(stage, err);
        let attempt = self.attempts(stage);
        self.push_record(stage, attempt, RecordOutcome::Warning, Some(failure.clone()), None);
        self.warnings.push(failure);
    }

    /// Record a failed attempt; `will_retry` decides the stage status
    pub fn record_failure(
        &mut self,
        stage: Stage,
        err: &DeployError,
        elapsed_ms: u64,
        will_retry: bool,
    ) {
        let failure = StageFailure::from_error(stage, err);
        let progress = self.stages.entry(stage).or_default();
        progress.status = if will_retry {
            StageStatus::Retried
        } else {
            StageStatus::Failed
        };
        progress.elapsed_ms += elapsed_ms;
        if !will_retry {
            progress.finished_at = Some(Utc::now());
        }
        let attempt = progress.attempts;
        self.push_record(stage, attempt, RecordOutcome::Failed, Some(failure), None);
    }

    /// Move to the terminal failed state
    ///
    /// The stage is closed as failed. A failed record is appended unless the
    /// failing attempt already recorded this same failure.
    pub fn fail(&mut self, stage: Stage, err: &DeployError) {
        let failure = StageFailure::from_error(stage, err);
        let progress = self.stages.entry(stage).or_default();
        progress.status = StageStatus::Failed;
        progress.finished_at = Some(Utc::now());
        let attempt = progress.attempts;

        let recorded = self.history.last().is_some_and(|last| {
            last.stage == stage
                && last.attempt == attempt
                && last.outcome == RecordOutcome::Failed
                && last.failure.as_ref().map(|f| f.kind) == Some(failure.kind)
        });
        if !recorded {
            self.push_record(stage, attempt, RecordOutcome::Failed, Some(failure.clone()), None);
        }
        self.failure = Some(failure);
        self.stage = Stage::Failed;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn push_record(
        &mut self,
        stage: Stage,
        attempt: u32,
        outcome: RecordOutcome,
        failure: Option<StageFailure>,
        note: Option<String>,
    ) {
        self.history.push(StageRecord {
            stage,
            attempt,
            outcome,
            failure,
            note,
            at: Utc::now(),
        });
        self.touch();
    }

    /// Build the caller-facing summary
    pub fn report(&self) -> DeploymentReport {
        match (&self.stage, &self.failure) {
            (Stage::Failed, failure) => {
                let (stage, kind, diagnostic) = match failure {
                    Some(f) => (f.stage, Some(f.kind), f.diagnostic.clone()),
                    None => (Stage::Failed, None, String::new()),
                };
                DeploymentReport::Failed(FailureReport {
                    session_id: self.id.clone(),
                    stage,
                    kind,
                    diagnostic,
                    partial_resource_ids: self
                        .infra
                        .as_ref()
                        .map(|i| i.resource_ids.clone())
                        .unwrap_or_default(),
                    warnings: self.warnings.clone(),
                })
            }
            (Stage::Succeeded, _) => DeploymentReport::Succeeded(SuccessReport {
                session_id: self.id.clone(),
                url: self.application_url().unwrap_or_default(),
                resource_ids: self
                    .infra
                    .as_ref()
                    .map(|i| i.resource_ids.clone())
                    .unwrap_or_default(),
                adapted_files: self
                    .adaptation
                    .as_ref()
                    .map(|a| a.modified_files())
                    .unwrap_or_default(),
                stage_timings_ms: self.stage_timings(),
                warnings: self.warnings.clone(),
            }),
            (stage, _) => DeploymentReport::InProgress {
                session_id: self.id.clone(),
                stage: *stage,
            },
        }
    }

    /// `http://<public_address>:<port>` once both are known
    pub fn application_url(&self) -> Option<String> {
        match (&self.infra, &self.plan) {
            (Some(infra), Some(plan)) => {
                Some(format!("http://{}:{}", infra.public_address, plan.port))
            }
            _ => None,
        }
    }

    fn stage_timings(&self) -> BTreeMap<Stage, u64> {
        self.stages
            .iter()
            .filter(|(_, p)| p.status == StageStatus::Succeeded)
            .map(|(stage, p)| (*stage, p.elapsed_ms))
            .collect()
    }
}

/// Report for a succeeded session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessReport {
    pub session_id: String,
    pub url: String,
    pub resource_ids: Vec<String>,
    pub adapted_files: Vec<String>,
    pub stage_timings_ms: BTreeMap<Stage, u64>,
    pub warnings: Vec<StageFailure>,
}

/// Report for a failed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub session_id: String,
    pub stage: Stage,
    pub kind: Option<ErrorKind>,
    pub diagnostic: String,
    pub partial_resource_ids: Vec<String>,
    pub warnings: Vec<StageFailure>,
}

/// Caller-facing outcome of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentReport {
    Succeeded(SuccessReport),
    Failed(FailureReport),
    InProgress { session_id: String, stage: Stage },
}
