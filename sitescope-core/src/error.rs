//! Error types for the Sitescope core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the completion service, each pipeline stage, persistence, and
//! configuration.

use std::path::PathBuf;

/// Top-level error type for the Sitescope core library.
#[derive(Debug, thiserror::Error)]
pub enum SitescopeError {
    #[error("Completion service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the completion service boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Request was cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Whether the call may be retried.
    ///
    /// Everything except rejected credentials and cancellation is retried
    /// within the configured bound: a server error or an unusable reply
    /// often succeeds on the next attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ServiceError::AuthFailed { .. } | ServiceError::Cancelled
        )
    }
}

/// Errors raised when constructing a research request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("Research topic must not be empty")]
    EmptyTopic,
}

/// Errors from the aspect planning stage.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("Aspect planning failed for '{topic}': {source}")]
    Service {
        topic: String,
        #[source]
        source: ServiceError,
    },

    #[error("Aspect planning was cancelled")]
    Cancelled,
}

/// Errors from an aspect research chain.
///
/// Service failures degrade the finding instead; only cancellation escapes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResearchError {
    #[error("Aspect research was cancelled")]
    Cancelled,
}

/// Errors from the risk evaluation stage.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Risk evaluation failed for '{topic}': {source}")]
    Service {
        topic: String,
        #[source]
        source: ServiceError,
    },

    #[error("Risk evaluation was cancelled")]
    Cancelled,
}

/// Errors from persisting the analysis report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free report filename for base '{base_name}' after {attempts} attempts")]
    NameExhausted { base_name: String, attempts: usize },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the pipeline orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Pipeline run was cancelled")]
    Cancelled,

    #[error("Planning stage failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Evaluation stage failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Writing stage failed: {0}")]
    Writing(#[from] ReportError),

    #[error("Nothing to retry: {reason}")]
    NothingToRetry { reason: String },
}

/// A type alias for results using the top-level `SitescopeError`.
pub type Result<T> = std::result::Result<T, SitescopeError>;
