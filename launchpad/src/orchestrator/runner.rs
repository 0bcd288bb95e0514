//! Session driver

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapt::{partial_failure, CodeAdapter};
use crate::analyzer::RepositoryAnalyzer;
use crate::deploy::executor::DeploymentExecutor;
use crate::errors::DeployError;
use crate::models::adaptation::AdaptationResult;
use crate::models::infra::ProvisionedInfrastructure;
use crate::models::plan::DeploymentPlan;
use crate::models::request::DeploymentRequest;
use crate::models::session::{DeploymentSession, Stage};
use crate::models::snapshot::RepositorySnapshot;
use crate::orchestrator::fsm::{transition, PipelineEvent};
use crate::orchestrator::retry::StagePolicies;
use crate::provision::InfrastructureProvisioner;
use crate::storage::sessions::SessionStore;
use crate::strategy::StrategyDecisionEngine;
use crate::utils::{bounded, sleep_or_cancel};

/// The five pipeline components
pub struct Components {
    pub analyzer: RepositoryAnalyzer,
    pub strategy: StrategyDecisionEngine,
    pub provisioner: InfrastructureProvisioner,
    pub adapter: CodeAdapter,
    pub executor: DeploymentExecutor,
}

/// What a successful stage attempt produced
enum StageOutput {
    Snapshot(RepositorySnapshot),
    Plan(DeploymentPlan),
    Infra {
        infra: ProvisionedInfrastructure,
        warning: Option<DeployError>,
    },
    ReusedInfra,
    Adapted(AdaptationResult),
    Deployed,
    Verified(u32),
}

/// Drives sessions through the pipeline and persists every transition
pub struct Orchestrator {
    store: Arc<SessionStore>,
    components: Components,
    policies: StagePolicies,
}

impl Orchestrator {
    pub fn new(store: Arc<SessionStore>, components: Components, policies: StagePolicies) -> Self {
        Self {
            store,
            components,
            policies,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session for `request` and run it to a terminal state
    pub async fn start(
        &self,
        request: DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSession, DeployError> {
        let session = DeploymentSession::new(request);
        self.store.create(&session).await?;
        info!("Created session {} for {}", session.id, session.request.repository);
        self.drive(session, cancel).await
    }

    /// Continue a session from its last recorded stage
    ///
    /// Terminal sessions are returned unchanged.
    pub async fn resume(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSession, DeployError> {
        let mut session = self.store.load(session_id).await?;
        if session.is_terminal() {
            info!("Session {} is already {}", session.id, session.stage);
            return Ok(session);
        }

        info!("Resuming session {} at {}", session.id, session.stage);
        if let Err(e) = self.rematerialize(&mut session, cancel).await {
            error!("Unable to restore workspace for {}: {}", session.id, e);
            let stage = session.stage;
            session.fail(stage, &e);
            self.store.save(&session).await?;
            return self.finish(session).await;
        }
        self.drive(session, cancel).await
    }

    /// Run a finished session again
    ///
    /// A recomputed plan equal to the provisioned one reuses the recorded
    /// infrastructure instead of provisioning.
    pub async fn redeploy(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSession, DeployError> {
        let mut session = self.store.load(session_id).await?;
        session.stage = transition(session.stage, &PipelineEvent::Redeploy).map_err(|_| {
            DeployError::InvalidRequest(format!(
                "session {} is still {}; resume it instead",
                session.id, session.stage
            ))
        })?;
        session.failure = None;
        session.warnings.clear();
        session.workspace_cleaned = false;
        session.touch();
        self.store.save(&session).await?;

        info!("Redeploying session {}", session.id);
        self.drive(session, cancel).await
    }

    /// Run stages until the session is terminal
    async fn drive(
        &self,
        mut session: DeploymentSession,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSession, DeployError> {
        while !session.is_terminal() {
            let stage = session.stage;
            if cancel.is_cancelled() {
                warn!("Session {} cancelled before {}", session.id, stage);
                session.fail(stage, &DeployError::Cancelled);
                self.store.save(&session).await?;
                break;
            }

            let event = match self.run_stage(&mut session, stage, cancel).await? {
                Ok(()) => PipelineEvent::StageCompleted,
                Err(e) => {
                    error!("Session {} failed at {}: {}", session.id, stage, e);
                    session.fail(stage, &e);
                    PipelineEvent::StageFailed
                }
            };
            session.stage = transition(stage, &event).map_err(DeployError::Internal)?;
            session.touch();
            self.store.save(&session).await?;
        }

        self.finish(session).await
    }

    /// Terminal bookkeeping: workspace cleanup
    async fn finish(&self, mut session: DeploymentSession) -> Result<DeploymentSession, DeployError> {
        if !session.workspace_cleaned {
            match self.components.analyzer.workspace_for(&session.id).delete().await {
                Ok(()) => session.workspace_cleaned = true,
                Err(e) => warn!("Unable to clean workspace of {}: {}", session.id, e),
            }
            session.touch();
            self.store.save(&session).await?;
        }
        info!("Session {} finished: {}", session.id, session.stage);
        Ok(session)
    }

    /// Attempt one stage under its retry policy
    ///
    /// The outer error is a storage failure; the inner one is the stage's
    /// final error once retries are exhausted or not allowed.
    #[instrument(skip_all, fields(session = %session.id, stage = %stage))]
    async fn run_stage(
        &self,
        session: &mut DeploymentSession,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<Result<(), DeployError>, DeployError> {
        let policy = self.policies.for_stage(stage);
        let mut tries = 0;

        loop {
            tries += 1;
            let attempt = session.begin_attempt(stage);
            self.store.save(session).await?;

            let started = Instant::now();
            let result = bounded(
                self.execute(session, stage, cancel),
                policy.timeout,
                cancel,
                || policy.timeout_error(stage),
            )
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let err = match result {
                Ok(output) => {
                    self.apply(session, stage, output, elapsed_ms);
                    info!("{} succeeded on attempt {}", stage, attempt);
                    return Ok(Ok(()));
                }
                Err(err) => err,
            };

            let will_retry = policy.should_retry(&err, tries) && !cancel.is_cancelled();
            session.record_failure(stage, &err, elapsed_ms, will_retry);
            self.store.save(session).await?;
            if !will_retry {
                return Ok(Err(err));
            }

            let delay = policy.backoff(tries);
            warn!(
                "{} attempt {} failed ({}), retrying in {:?}",
                stage, attempt, err, delay
            );
            if let Err(cancelled) = sleep_or_cancel(delay, cancel).await {
                return Ok(Err(cancelled));
            }
        }
    }

    /// Run the component for `stage` against the session's recorded inputs
    async fn execute(
        &self,
        session: &DeploymentSession,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, DeployError> {
        let c = &self.components;
        match stage {
            Stage::Analyzing => c
                .analyzer
                .analyze(&session.request, &session.id, cancel)
                .await
                .map(StageOutput::Snapshot),

            Stage::Deciding => c
                .strategy
                .decide(require(&session.snapshot, "snapshot")?, &session.request.hints)
                .map(StageOutput::Plan),

            Stage::Provisioning => {
                let plan = require(&session.plan, "plan")?;
                if session.infra.is_some() && session.provisioned_plan.as_ref() == Some(plan) {
                    return Ok(StageOutput::ReusedInfra);
                }
                match c
                    .provisioner
                    .provision(plan, session.infra.as_ref(), &session.id, cancel)
                    .await
                {
                    Ok(infra) => Ok(StageOutput::Infra {
                        infra,
                        warning: None,
                    }),
                    Err(DeployError::InfrastructureNotReady { reason, partial }) => {
                        Ok(StageOutput::Infra {
                            infra: (*partial).clone(),
                            warning: Some(DeployError::InfrastructureNotReady { reason, partial }),
                        })
                    }
                    Err(e) => Err(e),
                }
            }

            Stage::Adapting => Ok(StageOutput::Adapted(
                c.adapter
                    .adapt(
                        require(&session.snapshot, "snapshot")?,
                        require(&session.infra, "infrastructure")?,
                    )
                    .await,
            )),

            Stage::Deploying => c
                .executor
                .deploy(
                    require(&session.snapshot, "snapshot")?,
                    require(&session.plan, "plan")?,
                    require(&session.infra, "infrastructure")?,
                    cancel,
                )
                .await
                .map(|_| StageOutput::Deployed),

            Stage::Verifying => c
                .executor
                .verify(
                    require(&session.plan, "plan")?,
                    require(&session.infra, "infrastructure")?,
                    cancel,
                )
                .await
                .map(StageOutput::Verified),

            Stage::Succeeded | Stage::Failed => Err(DeployError::Internal(format!(
                "{} is not a working stage",
                stage
            ))),
        }
    }

    /// Store a stage result on the session
    fn apply(&self, session: &mut DeploymentSession, stage: Stage, output: StageOutput, elapsed_ms: u64) {
        match output {
            StageOutput::Snapshot(snapshot) => {
                let note = snapshot
                    .top_candidate()
                    .map(|c| format!("{} (score {})", c.framework, c.score));
                session.snapshot = Some(snapshot);
                session.record_success(stage, elapsed_ms, note);
            }
            StageOutput::Plan(plan) => {
                let note = format!(
                    "{} {} {} on port {}",
                    plan.provider, plan.framework, plan.style, plan.port
                );
                session.plan = Some(plan);
                session.record_success(stage, elapsed_ms, Some(note));
            }
            StageOutput::Infra { infra, warning } => {
                let note = format!("{} at {}", infra.instance_id, infra.public_address);
                session.infra = Some(infra);
                session.provisioned_plan = session.plan.clone();
                if let Some(warning) = warning {
                    warn!("Proceeding with unverified infrastructure: {}", warning);
                    session.record_warning(stage, &warning);
                }
                session.record_success(stage, elapsed_ms, Some(note));
            }
            StageOutput::ReusedInfra => {
                info!("Plan unchanged, reusing provisioned infrastructure");
                session.record_skipped(stage, "plan unchanged, infrastructure reused");
            }
            StageOutput::Adapted(result) => {
                if let Some(warning) = partial_failure(&result) {
                    warn!("{}", warning);
                    session.record_warning(stage, &warning);
                }
                let note = format!("{} file(s) modified", result.modified_files().len());
                session.adaptation = Some(result);
                session.record_success(stage, elapsed_ms, Some(note));
            }
            StageOutput::Deployed => session.record_success(stage, elapsed_ms, None),
            StageOutput::Verified(probes) => {
                session.record_success(stage, elapsed_ms, Some(format!("live after {} probe(s)", probes)))
            }
        }
    }

    /// Restore a removed workspace before a stage that reads it
    async fn rematerialize(
        &self,
        session: &mut DeploymentSession,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        if !matches!(session.stage, Stage::Adapting | Stage::Deploying) {
            return Ok(());
        }
        let present = match &session.snapshot {
            Some(snapshot) => tokio::fs::metadata(&snapshot.root).await.is_ok(),
            None => return Ok(()),
        };
        if present {
            return Ok(());
        }

        info!("Workspace of {} is gone, fetching the repository again", session.id);
        let policy = self.policies.for_stage(Stage::Analyzing);
        let snapshot = bounded(
            self.components.analyzer.analyze(&session.request, &session.id, cancel),
            policy.timeout,
            cancel,
            || policy.timeout_error(Stage::Analyzing),
        )
        .await?;

        if session.snapshot.as_ref().map(|s| s.digest.as_str()) != Some(snapshot.digest.as_str()) {
            warn!("Repository content changed since {} was analyzed", session.id);
        }

        // Deploying ships the workspace, which must carry the adapted source again
        if session.stage == Stage::Deploying {
            let infra = require(&session.infra, "infrastructure")?;
            let result = self.components.adapter.adapt(&snapshot, infra).await;
            if let Some(warning) = partial_failure(&result) {
                session.record_warning(Stage::Adapting, &warning);
            }
            session.adaptation = Some(result);
        }
        session.snapshot = Some(snapshot);
        session.workspace_cleaned = false;
        session.touch();
        self.store.save(session).await
    }
}

fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T, DeployError> {
    value
        .as_ref()
        .ok_or_else(|| DeployError::Internal(format!("session has no {}", what)))
}
