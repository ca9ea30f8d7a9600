//! # Sitescope Core
//!
//! Core library for Sitescope, a location risk report generator.
//! Provides the completion service abstraction and providers, the
//! research stages (planning, iterative aspect research, synthesis),
//! the six-category risk evaluator, the report writer, configuration,
//! and the pipeline that ties them together.

pub mod completion;
pub mod config;
pub mod error;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod research;
pub mod risk;
pub mod types;

// Re-export commonly used types at the crate root.
pub use completion::{CompletionClient, CompletionService, MockCompletionService};
pub use config::{AppConfig, LlmConfig, RetryConfig};
pub use error::{
    ConfigError, EvaluationError, PipelineError, PlanningError, ReportError, RequestError,
    ResearchError, Result, ServiceError, SitescopeError,
};
pub use pipeline::{
    NoOpPipelineCallback, Pipeline, PipelineCallback, PipelineSession, PipelineState,
    RecordingCallback,
};
pub use report::{AnalysisArtifact, ReportWriter};
pub use research::{Aspect, AspectFinding, ResearchDocument};
pub use risk::{RiskCategory, RiskCategoryAssessment, RiskRating, RiskReport};
pub use types::{Message, ResearchRequest, Role};
