//! Per-stage retry and timeout policy

use std::time::Duration;

use crate::errors::DeployError;
use crate::models::session::Stage;
use crate::storage::settings::{RetrySettings, TimeoutSettings};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// How one stage is attempted
#[derive(Debug, Clone, PartialEq)]
pub struct StagePolicy {
    /// Attempts allowed per drive of the session, at least 1
    pub max_attempts: u32,
    pub cooldown: CooldownOptions,
    pub timeout: Duration,
}

impl StagePolicy {
    /// Whether a failure on the `attempt`-th try (1-based) is tried again
    pub fn should_retry(&self, err: &DeployError, attempt: u32) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// Delay before the attempt after `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        calc_exp_backoff(&self.cooldown, attempt.saturating_sub(1))
    }

    /// The error reported when an attempt overruns its deadline
    pub fn timeout_error(&self, stage: Stage) -> DeployError {
        match stage {
            Stage::Provisioning => DeployError::ProvisioningTimeout(self.timeout.as_secs()),
            _ => DeployError::StageTimeout(self.timeout.as_secs()),
        }
    }
}

/// Policies for every working stage
#[derive(Debug, Clone, PartialEq)]
pub struct StagePolicies {
    pub max_attempts: u32,
    pub cooldown: CooldownOptions,
    pub analyze: Duration,
    pub decide: Duration,
    pub provision: Duration,
    pub adapt: Duration,
    pub deploy: Duration,
    pub verify: Duration,
}

impl StagePolicies {
    pub fn from_settings(retry: &RetrySettings, timeouts: &TimeoutSettings) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            cooldown: CooldownOptions {
                base_delay: Duration::from_secs(retry.base_delay_secs),
                max_delay: Duration::from_secs(retry.max_delay_secs),
                multiplier: 2.0,
            },
            analyze: Duration::from_secs(timeouts.analyze_secs),
            // Decisions are pure; they share the adaptation deadline
            decide: Duration::from_secs(timeouts.adapt_secs),
            provision: Duration::from_secs(timeouts.provision_secs),
            adapt: Duration::from_secs(timeouts.adapt_secs),
            deploy: Duration::from_secs(timeouts.deploy_secs),
            verify: Duration::from_secs(timeouts.verify_secs),
        }
    }

    pub fn for_stage(&self, stage: Stage) -> StagePolicy {
        let timeout = match stage {
            Stage::Analyzing => self.analyze,
            Stage::Deciding => self.decide,
            Stage::Provisioning => self.provision,
            Stage::Adapting => self.adapt,
            Stage::Deploying => self.deploy,
            Stage::Verifying | Stage::Succeeded | Stage::Failed => self.verify,
        };
        StagePolicy {
            max_attempts: self.max_attempts,
            cooldown: self.cooldown.clone(),
            timeout,
        }
    }
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default(), &TimeoutSettings::default())
    }
}
