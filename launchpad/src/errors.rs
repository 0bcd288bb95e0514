//! Error types for launchpad

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::infra::ProvisionedInfrastructure;

/// Main error type for the deployment pipeline
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchiveFormat(String),

    #[error("Repository is empty: {0}")]
    EmptyRepository(String),

    #[error("Ambiguous framework: {first} and {second} scored {first_score} and {second_score}")]
    AmbiguousFramework {
        first: String,
        second: String,
        first_score: u32,
        second_score: u32,
    },

    #[error("No framework detected: {0}")]
    NoFrameworkDetected(String),

    #[error("Unsupported framework: {0}")]
    UnsupportedFramework(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Template render error: {0}")]
    TemplateRenderError(String),

    #[error("Provisioning tool unavailable: {0}")]
    ProvisioningToolUnavailable(String),

    #[error("Provisioning apply failed: {diagnostic}")]
    ProvisioningApplyFailed { diagnostic: String },

    #[error("Provisioning timed out after {0}s")]
    ProvisioningTimeout(u64),

    #[error("Infrastructure not ready: {reason}")]
    InfrastructureNotReady {
        reason: String,
        partial: Box<ProvisionedInfrastructure>,
    },

    #[error("Adaptation partially failed for {} file(s)", .files.len())]
    AdaptationPartialFailure { files: Vec<String> },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Dependency install failed: {output}")]
    DependencyInstallFailed { output: String },

    #[error("Startup failed: {0}")]
    StartupFailed(String),

    #[error("Application not live: {0}")]
    LivenessFailed(String),

    #[error("Stage timed out after {0}s")]
    StageTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

/// Serializable error kind, recorded in session history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Json,
    Http,
    InvalidRequest,
    RepositoryUnavailable,
    UnsupportedArchiveFormat,
    EmptyRepository,
    AmbiguousFramework,
    NoFrameworkDetected,
    UnsupportedFramework,
    UnsupportedProvider,
    TemplateRenderError,
    ProvisioningToolUnavailable,
    ProvisioningApplyFailed,
    ProvisioningTimeout,
    InfrastructureNotReady,
    AdaptationPartialFailure,
    TransferFailed,
    DependencyInstallFailed,
    StartupFailed,
    LivenessFailed,
    StageTimeout,
    Cancelled,
    Storage,
    Config,
    Internal,
}

/// Error category, which decides the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request cannot be resolved without more information
    InputValidation,

    /// An external tool ran and reported failure
    ExternalTool,

    /// Network failures and timeouts
    Network,

    /// The stage produced a usable but degraded result
    PartialSuccess,

    /// Storage, serialization, cancellation and programming errors
    Internal,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::IoError(_) => ErrorKind::Io,
            DeployError::JsonError(_) => ErrorKind::Json,
            DeployError::HttpError(_) => ErrorKind::Http,
            DeployError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DeployError::RepositoryUnavailable(_) => ErrorKind::RepositoryUnavailable,
            DeployError::UnsupportedArchiveFormat(_) => ErrorKind::UnsupportedArchiveFormat,
            DeployError::EmptyRepository(_) => ErrorKind::EmptyRepository,
            DeployError::AmbiguousFramework { .. } => ErrorKind::AmbiguousFramework,
            DeployError::NoFrameworkDetected(_) => ErrorKind::NoFrameworkDetected,
            DeployError::UnsupportedFramework(_) => ErrorKind::UnsupportedFramework,
            DeployError::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            DeployError::TemplateRenderError(_) => ErrorKind::TemplateRenderError,
            DeployError::ProvisioningToolUnavailable(_) => ErrorKind::ProvisioningToolUnavailable,
            DeployError::ProvisioningApplyFailed { .. } => ErrorKind::ProvisioningApplyFailed,
            DeployError::ProvisioningTimeout(_) => ErrorKind::ProvisioningTimeout,
            DeployError::InfrastructureNotReady { .. } => ErrorKind::InfrastructureNotReady,
            DeployError::AdaptationPartialFailure { .. } => ErrorKind::AdaptationPartialFailure,
            DeployError::TransferFailed(_) => ErrorKind::TransferFailed,
            DeployError::DependencyInstallFailed { .. } => ErrorKind::DependencyInstallFailed,
            DeployError::StartupFailed(_) => ErrorKind::StartupFailed,
            DeployError::LivenessFailed(_) => ErrorKind::LivenessFailed,
            DeployError::StageTimeout(_) => ErrorKind::StageTimeout,
            DeployError::Cancelled => ErrorKind::Cancelled,
            DeployError::StorageError(_) => ErrorKind::Storage,
            DeployError::ConfigError(_) => ErrorKind::Config,
            DeployError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind() {
            ErrorKind::InvalidRequest
            | ErrorKind::UnsupportedArchiveFormat
            | ErrorKind::EmptyRepository
            | ErrorKind::AmbiguousFramework
            | ErrorKind::NoFrameworkDetected
            | ErrorKind::UnsupportedFramework
            | ErrorKind::UnsupportedProvider
            | ErrorKind::Config => ErrorCategory::InputValidation,

            ErrorKind::Io
            | ErrorKind::ProvisioningToolUnavailable
            | ErrorKind::ProvisioningApplyFailed
            | ErrorKind::TransferFailed
            | ErrorKind::DependencyInstallFailed
            | ErrorKind::StartupFailed => ErrorCategory::ExternalTool,

            ErrorKind::Http
            | ErrorKind::RepositoryUnavailable
            | ErrorKind::ProvisioningTimeout
            | ErrorKind::LivenessFailed
            | ErrorKind::StageTimeout => ErrorCategory::Network,

            ErrorKind::InfrastructureNotReady | ErrorKind::AdaptationPartialFailure => {
                ErrorCategory::PartialSuccess
            }

            ErrorKind::Json
            | ErrorKind::TemplateRenderError
            | ErrorKind::Cancelled
            | ErrorKind::Storage
            | ErrorKind::Internal => ErrorCategory::Internal,
        }
    }

    /// Whether a stage failing with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ExternalTool | ErrorCategory::Network
        )
    }

    /// The underlying diagnostic text, without the kind prefix where one exists
    pub fn diagnostic(&self) -> String {
        match self {
            DeployError::ProvisioningApplyFailed { diagnostic } => diagnostic.clone(),
            DeployError::DependencyInstallFailed { output } => output.clone(),
            DeployError::InfrastructureNotReady { reason, .. } => reason.clone(),
            DeployError::AdaptationPartialFailure { files } => files.join(", "),
            other => other.to_string(),
        }
    }
}
