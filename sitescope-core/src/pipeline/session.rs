//! Pipeline session state machine.
//!
//! A session moves strictly forward through
//! `Planning → Researching → Synthesizing → Evaluating → Writing → Done`.
//! `Failed` can be entered from Planning, Evaluating or Writing, and
//! `Cancelled` from any non-terminal state. The one way back is a retry of
//! a failed write, which re-enters `Writing` with research and risk intact.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::report::AnalysisArtifact;
use crate::research::{Aspect, AspectFinding, ResearchDocument, ResearchSynthesizer};
use crate::risk::RiskReport;
use crate::types::ResearchRequest;

/// Current state of a pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Planning,
    Researching,
    Synthesizing,
    Evaluating,
    Writing,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Whether a run may move from `self` to `next`.
    ///
    /// Does not cover the retry of a failed write, which depends on the
    /// session's failed stage.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Planning, Researching)
            | (Researching, Synthesizing)
            | (Synthesizing, Evaluating)
            | (Evaluating, Writing)
            | (Writing, Done) => true,
            (Planning | Evaluating | Writing, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Planning => "planning",
            PipelineState::Researching => "researching",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Evaluating => "evaluating",
            PipelineState::Writing => "writing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One run of the pipeline for one request.
///
/// Holds every intermediate product so a failed run can still show what it
/// gathered, and owns the cancellation token shared by all of its work.
#[derive(Debug)]
pub struct PipelineSession {
    id: Uuid,
    request: ResearchRequest,
    state: PipelineState,
    history: Vec<PipelineState>,
    failed_stage: Option<PipelineState>,
    error: Option<String>,
    aspects: Vec<Aspect>,
    /// Findings in completion order.
    findings: Vec<AspectFinding>,
    research: Option<ResearchDocument>,
    risk: Option<RiskReport>,
    artifact: Option<AnalysisArtifact>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl PipelineSession {
    pub fn new(request: ResearchRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            state: PipelineState::Planning,
            history: vec![PipelineState::Planning],
            failed_stage: None,
            error: None,
            aspects: Vec::new(),
            findings: Vec::new(),
            research: None,
            risk: None,
            artifact: None,
            created_at: now,
            updated_at: now,
            cancel: CancellationToken::new(),
        }
    }

    /// Move to `next`, or fail with `InvalidStateTransition`.
    pub fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        let write_retry = self.state == PipelineState::Failed
            && next == PipelineState::Writing
            && self.failed_stage == Some(PipelineState::Writing);

        if !self.state.can_transition_to(next) && !write_retry {
            return Err(PipelineError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if write_retry {
            self.failed_stage = None;
            self.error = None;
        }

        self.state = next;
        self.history.push(next);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure of the current stage and enter `Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), PipelineError> {
        let stage = self.state;
        self.transition(PipelineState::Failed)?;
        self.failed_stage = Some(stage);
        self.error = Some(error.into());
        Ok(())
    }

    /// Request cancellation of all outstanding work.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this session when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Rough completion fraction for progress displays.
    pub fn progress(&self) -> f32 {
        match self.state {
            PipelineState::Planning => 0.05,
            PipelineState::Researching => {
                let total = self.aspects.len().max(1) as f32;
                0.1 + 0.6 * (self.findings.len() as f32 / total)
            }
            PipelineState::Synthesizing => 0.75,
            PipelineState::Evaluating => 0.8,
            PipelineState::Writing => 0.95,
            PipelineState::Done => 1.0,
            PipelineState::Failed | PipelineState::Cancelled => {
                let stages = self.history.len().saturating_sub(1) as f32;
                (stages / 6.0).min(1.0)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &ResearchRequest {
        &self.request
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered, starting with `Planning`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// The stage that was running when the session failed.
    pub fn failed_stage(&self) -> Option<PipelineState> {
        self.failed_stage
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn aspects(&self) -> &[Aspect] {
        &self.aspects
    }

    pub fn findings(&self) -> &[AspectFinding] {
        &self.findings
    }

    pub fn research(&self) -> Option<&ResearchDocument> {
        self.research.as_ref()
    }

    pub fn risk(&self) -> Option<&RiskReport> {
        self.risk.as_ref()
    }

    pub fn artifact(&self) -> Option<&AnalysisArtifact> {
        self.artifact.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The research gathered so far, synthesized on demand if the run
    /// stopped before synthesis.
    pub fn partial_research(&self) -> Option<ResearchDocument> {
        match &self.research {
            Some(document) => Some(document.clone()),
            None if !self.findings.is_empty() => Some(ResearchSynthesizer::assemble(
                &self.request,
                self.findings.clone(),
            )),
            None => None,
        }
    }

    pub(crate) fn set_aspects(&mut self, aspects: Vec<Aspect>) {
        self.aspects = aspects;
        self.updated_at = Utc::now();
    }

    pub(crate) fn push_finding(&mut self, finding: AspectFinding) {
        self.findings.push(finding);
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_research(&mut self, research: ResearchDocument) {
        self.research = Some(research);
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_risk(&mut self, risk: RiskReport) {
        self.risk = Some(risk);
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_artifact(&mut self, artifact: AnalysisArtifact) {
        self.artifact = Some(artifact);
        self.updated_at = Utc::now();
    }
}

/// Callback trait for progress displays.
pub trait PipelineCallback: Send + Sync {
    /// Called when the session enters a new state.
    fn on_state_change(&self, state: PipelineState, progress: f32);
    /// Called once the aspect plan is known.
    fn on_aspects_planned(&self, aspects: &[Aspect]);
    /// Called as each aspect chain finishes, in completion order.
    fn on_aspect_complete(&self, finding: &AspectFinding, completed: usize, total: usize);
    /// Called when a stage fails.
    fn on_failed(&self, stage: PipelineState, error: &str);
}

/// No-op callback.
pub struct NoOpPipelineCallback;

impl PipelineCallback for NoOpPipelineCallback {
    fn on_state_change(&self, _state: PipelineState, _progress: f32) {}
    fn on_aspects_planned(&self, _aspects: &[Aspect]) {}
    fn on_aspect_complete(&self, _finding: &AspectFinding, _completed: usize, _total: usize) {}
    fn on_failed(&self, _stage: PipelineState, _error: &str) {}
}
