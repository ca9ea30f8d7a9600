//! Pipeline engine: drives a session through every stage.

use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info, warn};

use super::session::{NoOpPipelineCallback, PipelineCallback, PipelineSession, PipelineState};
use crate::completion::CompletionClient;
use crate::config::AppConfig;
use crate::error::{EvaluationError, PipelineError, PlanningError, ResearchError};
use crate::providers::create_service;
use crate::report::{AnalysisArtifact, ReportWriter};
use crate::research::{AspectPlanner, AspectResearcher, ResearchSynthesizer};
use crate::risk::RiskEvaluator;
use crate::types::ResearchRequest;

/// Runs the research and risk stages and writes the report.
pub struct Pipeline {
    planner: AspectPlanner,
    researcher: AspectResearcher,
    synthesizer: ResearchSynthesizer,
    evaluator: RiskEvaluator,
    writer: ReportWriter,
    max_parallel: usize,
    callback: Arc<dyn PipelineCallback>,
}

impl Pipeline {
    /// Build every stage from one completion client and the app configuration.
    pub fn new(client: CompletionClient, config: &AppConfig) -> Self {
        let synthesizer = if config.research.executive_summary {
            ResearchSynthesizer::with_executive_summary(client.clone())
        } else {
            ResearchSynthesizer::new()
        };

        Self {
            planner: AspectPlanner::new(client.clone()),
            researcher: AspectResearcher::new(client.clone()),
            synthesizer,
            evaluator: RiskEvaluator::new(client).with_focus(config.risk.focus.clone()),
            writer: ReportWriter::new(config.output.directory.clone()),
            max_parallel: config.research.max_parallel_aspects.max(1),
            callback: Arc::new(NoOpPipelineCallback),
        }
    }

    /// Validate `config`, connect to the configured completion service and
    /// build the pipeline on top of it.
    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        config.validate()?;
        let service = create_service(&config.llm)?;
        let client = CompletionClient::from_config(service, &config.llm);
        Ok(Self::new(client, config))
    }

    pub fn with_callback(mut self, callback: Arc<dyn PipelineCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn writer(&self) -> &ReportWriter {
        &self.writer
    }

    /// Start a new session for `request`.
    pub fn start_session(&self, request: ResearchRequest) -> PipelineSession {
        PipelineSession::new(request)
    }

    /// Run a fresh session to completion.
    ///
    /// On failure or cancellation the session keeps whatever was produced
    /// and records the stage that stopped it.
    pub async fn run(&self, session: &mut PipelineSession) -> Result<AnalysisArtifact, PipelineError> {
        if session.state() != PipelineState::Planning || session.history().len() != 1 {
            return Err(PipelineError::InvalidStateTransition {
                from: session.state().to_string(),
                to: PipelineState::Planning.to_string(),
            });
        }

        let request = session.request().clone();
        let cancel = session.cancel_token();
        info!(
            session = %session.id(),
            topic = request.topic(),
            breadth = request.breadth(),
            depth = request.depth(),
            "Starting pipeline run"
        );
        self.callback
            .on_state_change(PipelineState::Planning, session.progress());

        // Planning
        let aspects = match self.planner.plan(&request, &cancel).await {
            Ok(aspects) => aspects,
            Err(PlanningError::Cancelled) => return Err(self.cancelled(session)),
            Err(e) => return Err(self.failed(session, e.into())),
        };
        self.callback.on_aspects_planned(&aspects);
        session.set_aspects(aspects.clone());
        self.advance(session, PipelineState::Researching)?;

        // Researching
        let total = aspects.len();
        {
            let mut chains = pin!(self.researcher.research_all(
                request.topic(),
                aspects,
                request.depth(),
                self.max_parallel,
                &cancel,
            ));
            while let Some(result) = chains.next().await {
                match result {
                    Ok(finding) => {
                        session.push_finding(finding);
                        let done = session.findings().len();
                        if let Some(finding) = session.findings().last() {
                            self.callback.on_aspect_complete(finding, done, total);
                        }
                    }
                    Err(ResearchError::Cancelled) => return Err(self.cancelled(session)),
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(self.cancelled(session));
        }
        self.advance(session, PipelineState::Synthesizing)?;

        // Synthesizing
        let findings = session.findings().to_vec();
        let research = match self.synthesizer.synthesize(&request, findings, &cancel).await {
            Ok(document) => document,
            Err(ResearchError::Cancelled) => return Err(self.cancelled(session)),
        };
        let degraded = research.degraded_findings().count();
        if degraded > 0 {
            warn!(degraded, "Research completed with degraded aspects");
        }
        session.set_research(research.clone());
        self.advance(session, PipelineState::Evaluating)?;

        // Evaluating
        let risk = match self.evaluator.evaluate(&research, &cancel).await {
            Ok(risk) => risk,
            Err(EvaluationError::Cancelled) => return Err(self.cancelled(session)),
            Err(e) => return Err(self.failed(session, e.into())),
        };
        session.set_risk(risk);
        self.advance(session, PipelineState::Writing)?;

        // Writing
        if cancel.is_cancelled() {
            return Err(self.cancelled(session));
        }
        self.write(session)
    }

    /// Re-run only the Writing stage of a session whose write failed.
    pub fn retry_write(&self, session: &mut PipelineSession) -> Result<AnalysisArtifact, PipelineError> {
        if session.state() != PipelineState::Failed
            || session.failed_stage() != Some(PipelineState::Writing)
        {
            return Err(PipelineError::NothingToRetry {
                reason: format!(
                    "session is {} (failed stage: {})",
                    session.state(),
                    session
                        .failed_stage()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ),
            });
        }
        if session.research().is_none() || session.risk().is_none() {
            return Err(PipelineError::NothingToRetry {
                reason: "research or risk results are missing".to_string(),
            });
        }

        info!(session = %session.id(), "Retrying report write");
        self.advance(session, PipelineState::Writing)?;
        self.write(session)
    }

    fn write(&self, session: &mut PipelineSession) -> Result<AnalysisArtifact, PipelineError> {
        let (Some(research), Some(risk)) = (session.research().cloned(), session.risk().cloned())
        else {
            let err = PipelineError::NothingToRetry {
                reason: "research or risk results are missing".to_string(),
            };
            return Err(self.failed(session, err));
        };

        match self.writer.save(&research, &risk) {
            Ok(saved_path) => {
                let artifact = AnalysisArtifact {
                    research,
                    risk,
                    saved_path,
                };
                session.set_artifact(artifact.clone());
                self.advance(session, PipelineState::Done)?;
                info!(
                    session = %session.id(),
                    path = %artifact.saved_path.display(),
                    "Pipeline run complete"
                );
                Ok(artifact)
            }
            Err(e) => Err(self.failed(session, e.into())),
        }
    }

    fn advance(&self, session: &mut PipelineSession, next: PipelineState) -> Result<(), PipelineError> {
        session.transition(next)?;
        info!(session = %session.id(), state = %next, "Pipeline state changed");
        self.callback.on_state_change(next, session.progress());
        Ok(())
    }

    /// Enter `Failed` and hand back the stage error.
    fn failed(&self, session: &mut PipelineSession, err: PipelineError) -> PipelineError {
        let stage = session.state();
        error!(session = %session.id(), %stage, error = %err, "Pipeline stage failed");
        if let Err(transition_err) = session.fail(err.to_string()) {
            warn!(error = %transition_err, "Could not record failure");
        }
        self.callback.on_failed(stage, &err.to_string());
        err
    }

    /// Enter `Cancelled`.
    fn cancelled(&self, session: &mut PipelineSession) -> PipelineError {
        let stage = session.state();
        warn!(session = %session.id(), %stage, "Pipeline run cancelled");
        if session.transition(PipelineState::Cancelled).is_ok() {
            self.callback
                .on_state_change(PipelineState::Cancelled, session.progress());
        }
        PipelineError::Cancelled
    }
}
