//! Iterative aspect research.
//!
//! Each aspect is deepened over `depth` sequential iterations. Iteration one
//! sees only the topic and aspect; every later iteration sees the previous
//! finding and is asked to extend it. The chain's own prompts and findings
//! are passed as explicit context, so chains share nothing with each other.
//!
//! A failed iteration ends the chain early: the last good finding is kept
//! and marked degraded. Only cancellation is reported as an error.

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::error::{ResearchError, ServiceError};
use crate::research::planner::Aspect;
use crate::types::Message;

const RESEARCHER_SYSTEM_PROMPT: &str = "You are a thorough research analyst. Provide \
specific, factual, well-structured findings. Note uncertainty where it exists.";

/// The retained result of one aspect chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectFinding {
    pub aspect: Aspect,
    /// Completed iterations; 0 when none succeeded.
    pub iteration: u8,
    pub requested_depth: u8,
    pub text: String,
    /// Why the chain stopped short, if it did.
    pub degradation: Option<String>,
}

impl AspectFinding {
    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    /// True when no iteration succeeded and `text` is a stand-in.
    pub fn is_placeholder(&self) -> bool {
        self.iteration == 0
    }
}

/// Runs iterative research chains against the completion service.
#[derive(Clone)]
pub struct AspectResearcher {
    client: CompletionClient,
}

impl AspectResearcher {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// Research one aspect through up to `depth` refinement iterations.
    pub async fn research(
        &self,
        topic: &str,
        aspect: Aspect,
        depth: u8,
        cancel: &CancellationToken,
    ) -> Result<AspectFinding, ResearchError> {
        let mut context = vec![Message::system(RESEARCHER_SYSTEM_PROMPT)];
        let mut latest: Option<String> = None;
        let mut completed: u8 = 0;

        for iteration in 1..=depth {
            let prompt = match &latest {
                None => initial_prompt(topic, &aspect.name),
                Some(previous) => refinement_prompt(topic, &aspect.name, previous, iteration, depth),
            };

            match self.client.generate(&prompt, &context, cancel).await {
                Ok(text) => {
                    debug!(aspect = %aspect.name, iteration, len = text.len(), "Iteration complete");
                    context.push(Message::user(prompt));
                    context.push(Message::assistant(text.clone()));
                    latest = Some(text);
                    completed = iteration;
                }
                Err(ServiceError::Cancelled) => return Err(ResearchError::Cancelled),
                Err(e) => {
                    let reason = format!("iteration {iteration} of {depth} failed: {e}");
                    warn!(aspect = %aspect.name, %reason, "Aspect research degraded");
                    return Ok(degraded(aspect, completed, depth, latest, reason));
                }
            }
        }

        info!(aspect = %aspect.name, iterations = completed, "Aspect research complete");
        Ok(AspectFinding {
            aspect,
            iteration: completed,
            requested_depth: depth,
            text: latest.unwrap_or_default(),
            degradation: None,
        })
    }

    /// Research every aspect, at most `max_parallel` chains at a time.
    ///
    /// Findings are yielded in completion order, not plan order.
    pub fn research_all<'a>(
        &'a self,
        topic: &'a str,
        aspects: Vec<Aspect>,
        depth: u8,
        max_parallel: usize,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<AspectFinding, ResearchError>> + 'a {
        stream::iter(aspects)
            .map(move |aspect| self.research(topic, aspect, depth, cancel))
            .buffer_unordered(max_parallel.max(1))
    }
}

fn degraded(
    aspect: Aspect,
    completed: u8,
    depth: u8,
    latest: Option<String>,
    reason: String,
) -> AspectFinding {
    let text = latest.unwrap_or_else(|| {
        format!(
            "No findings could be gathered for \"{}\" ({}).",
            aspect.name, reason
        )
    });
    AspectFinding {
        aspect,
        iteration: completed,
        requested_depth: depth,
        text,
        degradation: Some(reason),
    }
}

fn initial_prompt(topic: &str, aspect: &str) -> String {
    format!(
        "Research the following aspect of \"{topic}\": {aspect}\n\n\
         Provide detailed findings with concrete facts, figures, dates and named sources \
         where known. Structure the answer with short paragraphs or bullet points."
    )
}

fn refinement_prompt(topic: &str, aspect: &str, previous: &str, iteration: u8, depth: u8) -> String {
    format!(
        "This is research pass {iteration} of {depth} on the aspect \"{aspect}\" of \"{topic}\".\n\n\
         Previous findings:\n{previous}\n\n\
         Extend and refine these findings. Go deeper, correct anything doubtful, add missing \
         detail and evidence. Do not simply repeat what is already there. Return the complete \
         improved findings."
    )
}
