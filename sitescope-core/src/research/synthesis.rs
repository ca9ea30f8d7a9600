//! Research synthesis: fold aspect findings into one research document.
//!
//! Assembly is pure: findings are ordered by ordinal and a methodology note
//! is attached. An optional executive-summary pass makes one extra
//! completion call; if it fails the summary is left out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::completion::CompletionClient;
use crate::error::{ResearchError, ServiceError};
use crate::research::researcher::AspectFinding;
use crate::types::{Message, ResearchRequest};

/// The synthesized output of the research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchDocument {
    pub topic: String,
    pub breadth: u8,
    pub depth: u8,
    /// One finding per aspect, ordered by ordinal.
    pub findings: Vec<AspectFinding>,
    pub methodology: String,
    pub executive_summary: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl ResearchDocument {
    /// Planned research points: aspects times iterations.
    pub fn total_research_points(&self) -> usize {
        usize::from(self.breadth) * usize::from(self.depth)
    }

    pub fn degraded_findings(&self) -> impl Iterator<Item = &AspectFinding> {
        self.findings.iter().filter(|f| f.is_degraded())
    }

    /// Whether at least one aspect produced real findings.
    pub fn has_substantive_findings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| !f.is_placeholder() && !f.text.trim().is_empty())
    }

    /// Render the research body. Headings start at level three so the
    /// document nests under a `## Research` section.
    pub fn render_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Research Date:** {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        md.push_str(&format!(
            "**Scope:** {} aspects, {} iterations each\n",
            self.breadth, self.depth
        ));
        md.push_str(&format!(
            "**Total Research Points:** {}\n\n",
            self.total_research_points()
        ));

        if let Some(summary) = &self.executive_summary {
            md.push_str("### Executive Summary\n\n");
            md.push_str(&nest_headings(summary, 3));
            md.push_str("\n\n");
        }

        md.push_str("### Research Methodology\n\n");
        md.push_str(&self.methodology);
        md.push_str("\n\n");

        md.push_str("### Detailed Findings\n\n");
        for (i, finding) in self.findings.iter().enumerate() {
            md.push_str(&format!("#### {}. {}\n\n", i + 1, finding.aspect.name));
            md.push_str(&nest_headings(&finding.text, 4));
            md.push_str("\n\n");
            if let Some(reason) = &finding.degradation {
                md.push_str(&format!(
                    "> Incomplete: {} of {} iterations completed ({}).\n\n",
                    finding.iteration, finding.requested_depth, reason
                ));
            }
        }

        md.push_str("### Sources and Methodology Notes\n\n");
        md.push_str(
            "Findings were produced by a language model from its training knowledge through \
             iterative refinement. No live sources were consulted; verify critical facts \
             independently before relying on them.\n",
        );
        md
    }
}

/// Push markdown headings in model output below `level` so they cannot
/// break the report's own section structure.
fn nest_headings(text: &str, level: usize) -> String {
    let prefix = "#".repeat(level);
    text.trim()
        .lines()
        .map(|line| {
            if line.trim_start().starts_with('#') {
                format!("{prefix}{}", line.trim_start())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the methodology note for a set of findings.
pub fn methodology_note(request: &ResearchRequest, findings: &[AspectFinding]) -> String {
    let points = usize::from(request.breadth()) * usize::from(request.depth());
    let mut note = format!(
        "The topic \"{}\" was broken into {} distinct aspects. Each aspect was researched \
         through {} iterative refinement passes, each pass building on the previous one, \
         for {} research points in total. Aspects were researched concurrently and are \
         presented in plan order.",
        request.topic(),
        request.breadth(),
        request.depth(),
        points
    );

    let degraded: Vec<&AspectFinding> = findings.iter().filter(|f| f.is_degraded()).collect();
    if !degraded.is_empty() {
        note.push_str("\n\nThe following aspects are incomplete:\n");
        for finding in degraded {
            note.push_str(&format!(
                "\n- {}: {} of {} iterations completed",
                finding.aspect.name, finding.iteration, finding.requested_depth
            ));
        }
    }
    note
}

const SUMMARY_SYSTEM_PROMPT: &str = "You write concise executive summaries of research \
findings for decision makers.";

/// Merges aspect findings into a `ResearchDocument`.
#[derive(Clone, Default)]
pub struct ResearchSynthesizer {
    summary_client: Option<CompletionClient>,
}

impl ResearchSynthesizer {
    /// A synthesizer that only assembles, with no extra completion calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the executive-summary pass.
    pub fn with_executive_summary(client: CompletionClient) -> Self {
        Self {
            summary_client: Some(client),
        }
    }

    /// Order findings by ordinal and attach the methodology note.
    pub fn assemble(request: &ResearchRequest, mut findings: Vec<AspectFinding>) -> ResearchDocument {
        findings.sort_by_key(|f| f.aspect.ordinal);
        let methodology = methodology_note(request, &findings);
        ResearchDocument {
            topic: request.topic().to_string(),
            breadth: request.breadth(),
            depth: request.depth(),
            findings,
            methodology,
            executive_summary: None,
            generated_at: Utc::now(),
        }
    }

    /// Assemble the document and, when enabled, add an executive summary.
    pub async fn synthesize(
        &self,
        request: &ResearchRequest,
        findings: Vec<AspectFinding>,
        cancel: &CancellationToken,
    ) -> Result<ResearchDocument, ResearchError> {
        let mut document = Self::assemble(request, findings);

        if let Some(client) = &self.summary_client
            && document.has_substantive_findings()
        {
            let prompt = summary_prompt(&document);
            let context = [Message::system(SUMMARY_SYSTEM_PROMPT)];
            match client.generate(&prompt, &context, cancel).await {
                Ok(summary) => document.executive_summary = Some(summary),
                Err(ServiceError::Cancelled) => return Err(ResearchError::Cancelled),
                Err(e) => warn!(error = %e, "Executive summary failed, continuing without it"),
            }
        }

        info!(
            topic = %document.topic,
            aspects = document.findings.len(),
            degraded = document.degraded_findings().count(),
            "Research synthesized"
        );
        Ok(document)
    }
}

fn summary_prompt(document: &ResearchDocument) -> String {
    let mut prompt = format!(
        "Write an executive summary (3-5 short paragraphs) of the research below on \"{}\". \
         Highlight the most important facts and open questions.\n\n",
        document.topic
    );
    for finding in document.findings.iter().filter(|f| !f.is_placeholder()) {
        prompt.push_str(&format!("## {}\n{}\n\n", finding.aspect.name, finding.text));
    }
    prompt
}
