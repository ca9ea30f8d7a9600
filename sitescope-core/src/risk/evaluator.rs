//! Risk evaluation: score a research document against the six categories.
//!
//! The model is asked for one headed section per category with
//! `Risk Level`, `Likelihood`, `Impact`, `Evidence` and `Mitigation` lines.
//! The reply is parsed leniently: heading depth, bold markers, bullets,
//! numbering and case do not matter. Whatever the model leaves out is filled
//! with insufficient-evidence placeholders.

use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RiskCategory, RiskCategoryAssessment, RiskRating, RiskReport};
use crate::completion::CompletionClient;
use crate::error::{EvaluationError, ServiceError};
use crate::research::ResearchDocument;
use crate::types::Message;

/// A bold-only line such as `1. **Safety & Security Risks**:`.
static BOLD_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]\s*|[-*•]\s+)?\*\*([^*]+)\*\*:?\s*$")
        .expect("bold heading pattern is valid")
});

/// A `Label: value` line, after emphasis has been stripped.
static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:\d+[.)]\s*|[-*•]\s+)?(risk\s+level|risk\s+rating|rating|likelihood|probability|impact|evidence|recommended\s+mitigations?|mitigations?|recommendations?)\s*:\s*(.*)$",
    )
    .expect("field line pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Rating,
    Likelihood,
    Impact,
    Evidence,
    Mitigation,
}

impl Field {
    fn from_label(label: &str) -> Field {
        let label = label.to_lowercase();
        if label.contains("level") || label.contains("rating") {
            Field::Rating
        } else if label.starts_with("likelihood") || label.starts_with("probability") {
            Field::Likelihood
        } else if label.starts_with("impact") {
            Field::Impact
        } else if label.starts_with("evidence") {
            Field::Evidence
        } else {
            Field::Mitigation
        }
    }
}

#[derive(Debug, Default)]
struct Section {
    rating: String,
    likelihood: String,
    impact: String,
    evidence: String,
    mitigation: String,
}

impl Section {
    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Rating => &mut self.rating,
            Field::Likelihood => &mut self.likelihood,
            Field::Impact => &mut self.impact,
            Field::Evidence => &mut self.evidence,
            Field::Mitigation => &mut self.mitigation,
        }
    }

    fn append(&mut self, field: Field, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let slot = self.slot(field);
        if !slot.is_empty() {
            slot.push(' ');
        }
        slot.push_str(text);
    }

    fn is_empty(&self) -> bool {
        [
            &self.rating,
            &self.likelihood,
            &self.impact,
            &self.evidence,
            &self.mitigation,
        ]
        .iter()
        .all(|s| s.trim().is_empty())
    }

    fn into_assessment(self, category: RiskCategory) -> RiskCategoryAssessment {
        if self.is_empty() {
            return RiskCategoryAssessment::insufficient_evidence(
                category,
                "the assessment gave no usable detail for this category",
            );
        }

        let likelihood = RiskRating::from_text(&self.likelihood);
        let impact = RiskRating::from_text(&self.impact);
        let rating = RiskRating::from_text(&self.rating).or_else(|| likelihood.max(impact));

        let mut evidence: Vec<String> = Vec::new();
        if !self.evidence.trim().is_empty() {
            evidence.push(self.evidence);
        }
        evidence.extend(prose_note("Likelihood", &self.likelihood));
        evidence.extend(prose_note("Impact", &self.impact));

        let mitigation = if self.mitigation.trim().is_empty() {
            "Not stated".to_string()
        } else {
            self.mitigation
        };

        RiskCategoryAssessment {
            category,
            rating: rating.unwrap_or(RiskRating::Undetermined),
            likelihood: likelihood.unwrap_or(RiskRating::Undetermined),
            impact: impact.unwrap_or(RiskRating::Undetermined),
            evidence: if evidence.is_empty() {
                "Not stated".to_string()
            } else {
                evidence.join(" ")
            },
            mitigation,
            insufficient_evidence: rating.is_none(),
        }
    }
}

/// `Label: text.` when `text` says more than a bare level word.
fn prose_note(label: &str, text: &str) -> Option<String> {
    let text = text.trim();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let bare_level = words.len() == 1 && RiskRating::from_text(text).is_some();
    if text.is_empty() || bare_level {
        return None;
    }
    let stop = if text.ends_with(['.', '!', '?']) { "" } else { "." };
    Some(format!("{label}: {text}{stop}"))
}

fn strip_emphasis(line: &str) -> String {
    line.replace("**", "").replace("__", "")
}

/// Depth given to bold-only headings, below every `#` level.
const BOLD_HEADING_LEVEL: usize = 7;

/// The level and text of a markdown heading or bold-only line.
fn heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        let text = strip_emphasis(trimmed.trim_start_matches('#')).trim().to_string();
        return Some((level, text));
    }
    BOLD_HEADING
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            let text = m.as_str().trim().trim_end_matches(':').to_string();
            (BOLD_HEADING_LEVEL, text)
        })
}

/// Parse a model reply into a six-category report.
pub fn parse_risk_response(topic: &str, text: &str) -> RiskReport {
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut sections: Vec<(RiskCategory, Section)> = Vec::new();
    // Index into `sections` and the heading level that opened it.
    let mut current: Option<(usize, usize)> = None;
    let mut field: Option<Field> = None;
    let mut seen_category = false;

    for line in text.lines() {
        if let Some((level, title)) = heading(line) {
            field = None;
            match RiskCategory::from_heading(&title) {
                Some(category) => {
                    seen_category = true;
                    current = if sections.iter().any(|(c, _)| *c == category) {
                        debug!(%category, "Ignoring repeated category section");
                        None
                    } else {
                        sections.push((category, Section::default()));
                        Some((sections.len() - 1, level))
                    };
                }
                // A sub-heading stays inside its category; a sibling or
                // parent heading closes it. Bold lines never close a section.
                None => {
                    if let Some((_, open_level)) = current
                        && level <= open_level
                        && level != BOLD_HEADING_LEVEL
                    {
                        current = None;
                    }
                }
            }
            continue;
        }

        let Some((index, _)) = current else {
            if !seen_category {
                summary_lines.push(line);
            }
            continue;
        };

        let clean = strip_emphasis(line);
        let section = &mut sections[index].1;
        if let Some(caps) = FIELD_LINE.captures(&clean) {
            let f = Field::from_label(&caps[1]);
            section.append(f, &caps[2]);
            field = Some(f);
        } else if clean.trim().is_empty() {
            field = None;
        } else if let Some(f) = field {
            let continuation = clean.trim().trim_start_matches(['-', '*', '•']).trim();
            section.append(f, continuation);
        }
    }

    let summary = summary_lines.join("\n").trim().to_string();
    let assessments = sections
        .into_iter()
        .map(|(category, section)| section.into_assessment(category))
        .collect();

    RiskReport::from_assessments(
        topic,
        assessments,
        (!summary.is_empty()).then_some(summary),
    )
}

const EVALUATOR_SYSTEM_PROMPT: &str = "You are an expert risk assessment analyst for \
locations, buildings and assets. Base every judgement on the research data provided, be \
specific and balanced, and say so when the evidence is thin.";

/// Scores research documents against the six risk categories.
#[derive(Clone)]
pub struct RiskEvaluator {
    client: CompletionClient,
    focus: Vec<RiskCategory>,
}

impl RiskEvaluator {
    pub fn new(client: CompletionClient) -> Self {
        Self {
            client,
            focus: Vec::new(),
        }
    }

    /// Emphasise the given categories. All six are still reported.
    pub fn with_focus(mut self, focus: Vec<RiskCategory>) -> Self {
        self.focus = focus;
        self
    }

    /// Evaluate the document with a single completion call.
    ///
    /// A document without substantive findings is scored as insufficient
    /// evidence across the board without calling the model.
    pub async fn evaluate(
        &self,
        document: &ResearchDocument,
        cancel: &CancellationToken,
    ) -> Result<RiskReport, EvaluationError> {
        if !document.has_substantive_findings() {
            warn!(topic = %document.topic, "No substantive research findings, skipping risk model call");
            let assessments = RiskCategory::ALL
                .into_iter()
                .map(|c| {
                    RiskCategoryAssessment::insufficient_evidence(
                        c,
                        "the research stage produced no usable findings",
                    )
                })
                .collect();
            return Ok(RiskReport::from_assessments(
                &document.topic,
                assessments,
                Some("No risk assessment was possible because research produced no findings.".to_string()),
            ));
        }

        let prompt = self.evaluation_prompt(document);
        let context = [Message::system(EVALUATOR_SYSTEM_PROMPT)];
        let reply = self
            .client
            .generate(&prompt, &context, cancel)
            .await
            .map_err(|e| match e {
                ServiceError::Cancelled => EvaluationError::Cancelled,
                source => EvaluationError::Service {
                    topic: document.topic.clone(),
                    source,
                },
            })?;

        let report = parse_risk_response(&document.topic, &reply);
        let missing = report
            .categories
            .iter()
            .filter(|a| a.insufficient_evidence)
            .count();
        if missing > 0 {
            warn!(missing, "Risk assessment left categories without evidence");
        }
        info!(
            topic = %document.topic,
            overall = %report.overall_rating(),
            "Risk evaluation complete"
        );
        Ok(report)
    }

    fn evaluation_prompt(&self, document: &ResearchDocument) -> String {
        let mut prompt = format!(
            "Perform a comprehensive risk assessment for: {}\n\n",
            document.topic
        );

        prompt.push_str("Evaluate every one of these categories:\n");
        for category in RiskCategory::ALL {
            prompt.push_str(&format!("- {}: {}\n", category, category.scope()));
        }

        if self.focus.is_empty() {
            prompt.push_str("\nFocus on: all risk categories\n");
        } else {
            let names: Vec<&str> = self.focus.iter().map(|c| c.display_name()).collect();
            prompt.push_str(&format!(
                "\nFocus on: {} (give these the most detail, but still cover every category)\n",
                names.join(", ")
            ));
        }

        prompt.push_str(
            "\nFormat the answer exactly like this:\n\
             ## Executive Risk Summary\n\
             <overall risk rating and the top three risks>\n\n\
             Then, for each category, a section:\n\
             ## <Category name>\n\
             Risk Level: Critical | High | Medium | Low\n\
             Likelihood: High | Medium | Low\n\
             Impact: Critical | High | Medium | Low\n\
             Evidence: <supporting data from the research, including why you chose these levels>\n\
             Mitigation: <concrete recommended actions>\n\n\
             If the research holds no evidence for a category, say so in its Evidence line.\n\n",
        );

        prompt.push_str("Research data:\n\n");
        prompt.push_str(&document.render_markdown());
        prompt
    }
}
