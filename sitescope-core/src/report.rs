//! Report writing: persist research and risk as one markdown file.
//!
//! File names are `<sanitized topic>_<YYYYMMDD_HHMMSS>.md` in the output
//! directory. Files are created exclusively; when the name is taken the
//! writer tries `-2`, `-3`, ... so an existing report is never replaced.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReportError;
use crate::persistence::write_new;
use crate::research::ResearchDocument;
use crate::risk::RiskReport;

const MAX_STEM_CHARS: usize = 100;
const MAX_NAME_ATTEMPTS: usize = 100;

/// The saved result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub research: ResearchDocument,
    pub risk: RiskReport,
    pub saved_path: PathBuf,
}

/// Make a topic safe to use as a file name stem.
///
/// Characters outside `[A-Za-z0-9,._-]` become `_`, runs of `_` collapse,
/// leading and trailing `_`, `.` and `-` are removed, and the result is cut
/// to 100 characters. An empty result becomes `report`.
pub fn sanitize_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    for c in topic.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed: String = out
        .trim_matches(|c| matches!(c, '_' | '.' | '-'))
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches(|c| matches!(c, '_' | '.' | '-'));

    if trimmed.is_empty() {
        "report".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized topic>_<YYYYMMDD_HHMMSS>` for the given moment.
pub fn report_stem(topic: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", sanitize_topic(topic), at.format("%Y%m%d_%H%M%S"))
}

/// Render the combined markdown document.
pub fn render_report(research: &ResearchDocument, risk: &RiskReport, at: DateTime<Local>) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Location Risk Analysis: {}\n\n", research.topic));
    md.push_str(&format!("**Generated:** {}\n\n", at.format("%Y-%m-%d %H:%M:%S %Z")));
    md.push_str("---\n\n");

    md.push_str("## Research\n\n");
    md.push_str(research.render_markdown().trim_end());
    md.push_str("\n\n---\n\n");

    md.push_str("## Risk Assessment\n\n");
    md.push_str(risk.render_markdown().trim_end());
    md.push('\n');
    md
}

/// Writes analysis reports into an output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Save the report under a fresh, timestamped name and return its path.
    pub fn save(&self, research: &ResearchDocument, risk: &RiskReport) -> Result<PathBuf, ReportError> {
        self.save_at(research, risk, Local::now())
    }

    /// Like [`save`](Self::save) with an explicit timestamp.
    pub fn save_at(
        &self,
        research: &ResearchDocument,
        risk: &RiskReport,
        at: DateTime<Local>,
    ) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ReportError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })?;

        let stem = report_stem(&research.topic, at);
        let content = render_report(research, risk, at);

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = if attempt == 1 {
                format!("{stem}.md")
            } else {
                format!("{stem}-{attempt}.md")
            };
            let path = self.output_dir.join(name);

            match write_new(&path, content.as_bytes()) {
                Ok(()) => {
                    info!(path = %path.display(), bytes = content.len(), "Report saved");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "Report name taken, trying next suffix");
                }
                Err(source) => return Err(ReportError::Write { path, source }),
            }
        }

        Err(ReportError::NameExhausted {
            base_name: stem,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}
