//! Single analysis run: resolve the request, drive the pipeline, report.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sitescope_core::config::{AppConfig, load_config};
use sitescope_core::pipeline::{Pipeline, PipelineCallback, PipelineSession, PipelineState};
use sitescope_core::research::{Aspect, AspectFinding};
use sitescope_core::{PipelineError, ResearchRequest, RiskCategory};
use tracing::{info, warn};

use crate::Cli;

/// Everything a run needs from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub topic: Option<String>,
    pub breadth: Option<u32>,
    pub depth: Option<u32>,
    pub quick: bool,
    pub focus: Vec<RiskCategory>,
    pub output_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub print: bool,
    pub quiet: bool,
}

impl RunOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            topic: cli.topic.clone(),
            breadth: cli.breadth,
            depth: cli.depth,
            quick: cli.quick,
            focus: cli.focus.clone(),
            output_dir: cli.output_dir.clone(),
            model: cli.model.clone(),
            print: cli.print,
            quiet: cli.quiet,
        }
    }

    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        if !self.focus.is_empty() {
            config.risk.focus = self.focus.clone();
        }
    }

    /// Build the request, falling back to configured defaults.
    pub fn request(&self, topic: String, config: &AppConfig) -> anyhow::Result<ResearchRequest> {
        let request = if self.quick {
            ResearchRequest::quick(topic)?
        } else {
            ResearchRequest::new(
                topic,
                self.breadth
                    .unwrap_or(u32::from(config.research.default_breadth)),
                self.depth.unwrap_or(u32::from(config.research.default_depth)),
            )?
        };
        Ok(request)
    }
}

/// Prints stage progress to stdout.
struct ConsoleProgress {
    quiet: bool,
}

impl PipelineCallback for ConsoleProgress {
    fn on_state_change(&self, state: PipelineState, progress: f32) {
        if self.quiet {
            return;
        }
        let label = match state {
            PipelineState::Planning => "Planning research aspects",
            PipelineState::Researching => "Researching aspects",
            PipelineState::Synthesizing => "Synthesizing findings",
            PipelineState::Evaluating => "Evaluating risks",
            PipelineState::Writing => "Writing report",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
            PipelineState::Cancelled => "Cancelled",
        };
        println!("[{:>3.0}%] {}", progress * 100.0, label);
    }

    fn on_aspects_planned(&self, aspects: &[Aspect]) {
        if self.quiet {
            return;
        }
        for aspect in aspects {
            println!("       {}. {}", aspect.ordinal + 1, aspect.name);
        }
    }

    fn on_aspect_complete(&self, finding: &AspectFinding, completed: usize, total: usize) {
        if self.quiet {
            return;
        }
        let note = if finding.is_degraded() { " (incomplete)" } else { "" };
        println!(
            "       [{completed}/{total}] {}{note}",
            finding.aspect.name
        );
    }

    fn on_failed(&self, stage: PipelineState, error: &str) {
        eprintln!("Stage '{stage}' failed: {error}");
    }
}

/// Read the topic from stdin, prompting when attached to a terminal.
fn read_topic_from_stdin() -> anyhow::Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        print!("Location to analyse: ");
        io::stdout().flush()?;
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    } else {
        Ok(io::read_to_string(stdin)?.trim().to_string())
    }
}

/// Run one analysis and print the outcome.
pub async fn run_analysis(options: RunOptions, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load_config(Some(workspace), None).context("Configuration error")?;
    options.apply_overrides(&mut config);
    let pipeline = Pipeline::from_config(&config)
        .context("Configuration error")?
        .with_callback(Arc::new(ConsoleProgress {
            quiet: options.quiet,
        }));

    let topic = match &options.topic {
        Some(topic) => topic.clone(),
        None => read_topic_from_stdin().context("Failed to read topic from stdin")?,
    };
    let request = options.request(topic, &config)?;

    if !options.quiet {
        println!(
            "Analysing \"{}\" ({} aspects, depth {}) with {}",
            request.topic(),
            request.breadth(),
            request.depth(),
            config.llm.model
        );
    }

    let mut session = pipeline.start_session(request);
    let cancel = session.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let result = pipeline.run(&mut session).await;
    ctrl_c.abort();

    match result {
        Ok(artifact) => {
            info!(path = %artifact.saved_path.display(), "Report written");
            println!("Report saved to {}", artifact.saved_path.display());
            if options.print {
                let markdown = std::fs::read_to_string(&artifact.saved_path)
                    .with_context(|| format!("Failed to read {}", artifact.saved_path.display()))?;
                println!("\n{markdown}");
            }
            Ok(())
        }
        Err(PipelineError::Cancelled) => {
            anyhow::bail!("Run cancelled during {}; no report was written", stage_of(&session))
        }
        Err(e) => {
            print_partial(&session);
            Err(anyhow::anyhow!(e)).context(format!("Run failed during {}", stage_of(&session)))
        }
    }
}

fn stage_of(session: &PipelineSession) -> String {
    session
        .failed_stage()
        .or_else(|| session.history().iter().rev().nth(1).copied())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "startup".to_string())
}

/// Print whatever the run produced before it stopped.
fn print_partial(session: &PipelineSession) {
    let Some(research) = session.partial_research() else {
        return;
    };
    if research.findings.is_empty() {
        return;
    }
    println!("\nPartial research gathered before the failure:\n");
    println!("{}", research.render_markdown());
    if let Some(risk) = session.risk() {
        println!("{}", risk.render_markdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_uses_config_defaults() {
        let mut config = AppConfig::default();
        config.research.default_breadth = 4;
        config.research.default_depth = 1;
        let options = RunOptions::default();

        let request = options.request("Harbor".to_string(), &config).unwrap();
        assert_eq!((request.breadth(), request.depth()), (4, 1));
    }

    #[test]
    fn test_request_flags_override_defaults() {
        let options = RunOptions {
            breadth: Some(7),
            depth: Some(3),
            ..Default::default()
        };
        let request = options
            .request("Harbor".to_string(), &AppConfig::default())
            .unwrap();
        assert_eq!((request.breadth(), request.depth()), (7, 3));
    }

    #[test]
    fn test_quick_request() {
        let options = RunOptions {
            quick: true,
            ..Default::default()
        };
        let request = options
            .request("Harbor".to_string(), &AppConfig::default())
            .unwrap();
        assert_eq!((request.breadth(), request.depth()), (2, 1));
    }

    #[test]
    fn test_blank_topic_is_an_error() {
        let options = RunOptions::default();
        assert!(options.request("  ".to_string(), &AppConfig::default()).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = AppConfig::default();
        let options = RunOptions {
            model: Some("gpt-4o-mini".into()),
            output_dir: Some(PathBuf::from("/tmp/out")),
            focus: vec![RiskCategory::RegulatoryLegal],
            ..Default::default()
        };
        options.apply_overrides(&mut config);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(config.risk.focus, vec![RiskCategory::RegulatoryLegal]);
    }

    #[test]
    fn test_stage_of_failed_session() {
        let mut session = PipelineSession::new(ResearchRequest::new("Harbor", 1, 1).unwrap());
        session.transition(PipelineState::Researching).unwrap();
        session.transition(PipelineState::Synthesizing).unwrap();
        session.transition(PipelineState::Evaluating).unwrap();
        session.fail("boom").unwrap();
        assert_eq!(stage_of(&session), "evaluating");
    }

    #[test]
    fn test_stage_of_cancelled_session() {
        let mut session = PipelineSession::new(ResearchRequest::new("Harbor", 1, 1).unwrap());
        session.transition(PipelineState::Researching).unwrap();
        session.transition(PipelineState::Cancelled).unwrap();
        assert_eq!(stage_of(&session), "researching");
    }
}
