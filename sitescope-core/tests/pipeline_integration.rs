//! Integration tests for the Sitescope pipeline.
//!
//! These tests drive full runs end-to-end with MockCompletionService,
//! verifying the Planning → Researching → Synthesizing → Evaluating →
//! Writing → Done cycle, failure stages, and cancellation.

use sitescope_core::completion::{CompletionClient, MockCompletionService};
use sitescope_core::config::{AppConfig, RetryConfig};
use sitescope_core::error::{PipelineError, ServiceError};
use sitescope_core::pipeline::{Pipeline, PipelineState, RecordingCallback};
use sitescope_core::risk::{RiskCategory, RiskRating};
use sitescope_core::types::ResearchRequest;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RISK_REPLY: &str = "\
## Executive Risk Summary
Overall risk rating: Medium. Age of the building and crowd density dominate.

## Structural & Engineering
Risk Level: Low
Likelihood: Low
Impact: High
Evidence: Steel frame, renovated 2009-2019
Mitigation: Continue facade inspections

## Environmental & Natural Disaster
Risk Level: Medium
Likelihood: Medium
Impact: Medium
Evidence: Coastal storm exposure
Mitigation: Flood barriers for lower levels

## Safety & Security
Risk Level: High
Likelihood: Medium
Impact: High
Evidence: Iconic target, high visitor volume
Mitigation: Screening at entrances

## Financial & Economic
Risk Level: Low
Likelihood: Low
Impact: Medium
Evidence: Stable tenancy
Mitigation: Diversified tenants

## Regulatory & Legal
Risk Level: Low
Likelihood: Low
Impact: Low
Evidence: Landmark status well established
Mitigation: None needed

## Operational & Business
Risk Level: Medium
Likelihood: Medium
Impact: Medium
Evidence: Observatory closures affect revenue
Mitigation: Staggered maintenance windows
";

fn is_planning(prompt: &str) -> bool {
    prompt.starts_with("Break down")
}

fn is_research(prompt: &str) -> bool {
    prompt.starts_with("Research the following") || prompt.starts_with("This is research pass")
}

fn is_evaluation(prompt: &str) -> bool {
    prompt.starts_with("Perform a comprehensive risk assessment")
}

/// A service that answers each stage with plausible text.
fn scripted_service(plan: &'static str) -> MockCompletionService {
    MockCompletionService::from_fn(move |prompt, context| {
        if is_planning(prompt) {
            Ok(plan.to_string())
        } else if is_evaluation(prompt) {
            Ok(RISK_REPLY.to_string())
        } else {
            // One prior user/assistant pair per completed iteration.
            let pass = context.len() / 2 + 1;
            Ok(format!("Findings from pass {pass}."))
        }
    })
}

/// Helper to create a pipeline writing into `dir`, with a recording callback.
fn create_pipeline(
    service: Arc<MockCompletionService>,
    dir: &Path,
) -> (Pipeline, Arc<RecordingCallback>) {
    let mut config = AppConfig::default();
    config.output.directory = dir.to_path_buf();
    let retry = RetryConfig {
        max_retries: 0,
        ..Default::default()
    };
    let client = CompletionClient::new(service, retry, Duration::from_secs(5));
    let callback = Arc::new(RecordingCallback::new());
    let pipeline = Pipeline::new(client, &config).with_callback(callback.clone());
    (pipeline, callback)
}

fn report_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

// --- Integration Tests ---

#[tokio::test]
async fn test_full_run_produces_one_report() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(scripted_service(
        "1. Structural history\n2. Visitor safety\n3. Flood exposure\n",
    ));
    let (pipeline, callback) = create_pipeline(service.clone(), dir.path());

    let request = ResearchRequest::new("Empire State Building, New York", 3, 2).unwrap();
    let mut session = pipeline.start_session(request);
    let artifact = pipeline.run(&mut session).await.unwrap();

    assert_eq!(
        session.history(),
        &[
            PipelineState::Planning,
            PipelineState::Researching,
            PipelineState::Synthesizing,
            PipelineState::Evaluating,
            PipelineState::Writing,
            PipelineState::Done,
        ]
    );
    assert_eq!(callback.states(), session.history().to_vec());

    // 1 planning + 3 aspects × 2 passes + 1 evaluation
    assert_eq!(service.call_count(), 8);

    assert_eq!(artifact.research.findings.len(), 3);
    assert!(artifact.research.findings.iter().all(|f| f.iteration == 2));
    assert!(
        artifact
            .research
            .findings
            .iter()
            .all(|f| f.text == "Findings from pass 2.")
    );
    assert_eq!(artifact.research.total_research_points(), 6);

    assert_eq!(artifact.risk.categories.len(), 6);
    assert_eq!(
        artifact.risk.get(RiskCategory::SafetySecurity).unwrap().rating,
        RiskRating::High
    );
    assert_eq!(artifact.risk.overall_rating(), RiskRating::High);

    let files = report_files(dir.path());
    assert_eq!(files.len(), 1);
    let name = &files[0];
    assert!(name.starts_with("Empire_State_Building,_New_York_"));
    assert!(name.ends_with(".md"));

    let content = std::fs::read_to_string(&artifact.saved_path).unwrap();
    assert!(content.contains("## Research"));
    assert!(content.contains("## Risk Assessment"));
    for category in RiskCategory::ALL {
        assert!(content.contains(category.display_name()), "missing {category}");
    }
    assert_eq!(session.artifact().unwrap().saved_path, artifact.saved_path);
}

#[tokio::test]
async fn test_refinement_sees_previous_findings() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(scripted_service("1. Foundations\n"));
    let (pipeline, _) = create_pipeline(service.clone(), dir.path());

    let mut session =
        pipeline.start_session(ResearchRequest::new("Flatiron Building", 1, 3).unwrap());
    pipeline.run(&mut session).await.unwrap();

    let research_calls: Vec<_> = service
        .calls()
        .into_iter()
        .filter(|c| is_research(&c.prompt))
        .collect();
    assert_eq!(research_calls.len(), 3);
    assert!(research_calls[1].prompt.contains("Findings from pass 1."));
    assert!(research_calls[2].prompt.contains("Findings from pass 2."));
    assert!(research_calls[2].context.len() > research_calls[1].context.len());
}

#[tokio::test]
async fn test_findings_keep_plan_order() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(
        scripted_service("1. Alpha\n2. Beta\n3. Gamma\n").with_delay(|prompt| {
            if !is_research(prompt) {
                Duration::ZERO
            } else if prompt.contains("Alpha") {
                Duration::from_millis(200)
            } else if prompt.contains("Beta") {
                Duration::from_millis(80)
            } else {
                Duration::ZERO
            }
        }),
    );
    let (pipeline, callback) = create_pipeline(service, dir.path());

    let mut session = pipeline.start_session(ResearchRequest::new("Old Town", 3, 1).unwrap());
    let artifact = pipeline.run(&mut session).await.unwrap();

    let names: Vec<&str> = artifact
        .research
        .findings
        .iter()
        .map(|f| f.aspect.name.as_str())
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);

    let completed = callback.completed_aspects();
    assert_eq!(completed.len(), 3);
    assert_eq!(completed[0].0, "Gamma");
    assert_eq!(completed[2], ("Alpha".to_string(), 3, 3));
}

#[tokio::test]
async fn test_short_plan_is_padded() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(scripted_service("1. Only one\n"));
    let (pipeline, callback) = create_pipeline(service, dir.path());

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 4, 1).unwrap());
    let artifact = pipeline.run(&mut session).await.unwrap();

    assert_eq!(session.aspects().len(), 4);
    assert_eq!(session.aspects()[0].name, "Only one");
    assert_eq!(callback.planned_aspects().len(), 4);
    assert_eq!(artifact.research.findings.len(), 4);
}

#[tokio::test]
async fn test_degraded_aspect_does_not_fail_run() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(MockCompletionService::from_fn(|prompt, _| {
        if is_planning(prompt) {
            Ok("1. Reliable\n2. Broken\n".to_string())
        } else if is_evaluation(prompt) {
            Ok(RISK_REPLY.to_string())
        } else if prompt.contains("Broken") {
            Err(ServiceError::AuthFailed {
                provider: "mock".into(),
            })
        } else {
            Ok("Solid findings.".to_string())
        }
    }));
    let (pipeline, _) = create_pipeline(service, dir.path());

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 2, 2).unwrap());
    let artifact = pipeline.run(&mut session).await.unwrap();

    assert_eq!(session.state(), PipelineState::Done);
    let broken = &artifact.research.findings[1];
    assert!(broken.is_degraded());
    assert!(broken.is_placeholder());
    assert!(!artifact.research.findings[0].is_degraded());

    let content = std::fs::read_to_string(&artifact.saved_path).unwrap();
    assert!(content.contains("Incomplete"));
}

#[tokio::test]
async fn test_cancel_during_research_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let reports = dir.path().join("reports");
    let service = Arc::new(
        scripted_service("1. Alpha\n2. Beta\n").with_delay(|prompt| {
            if is_research(prompt) {
                Duration::from_secs(10)
            } else {
                Duration::ZERO
            }
        }),
    );
    let (pipeline, callback) = create_pipeline(service, &reports);

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 2, 2).unwrap());
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = pipeline.run(&mut session).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(session.state(), PipelineState::Cancelled);
    assert!(session.artifact().is_none());
    assert!(report_files(&reports).is_empty());
    assert_eq!(callback.states().last(), Some(&PipelineState::Cancelled));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(scripted_service("1. Alpha\n"));
    let (pipeline, _) = create_pipeline(service.clone(), dir.path());

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 1, 1).unwrap());
    session.cancel();

    let err = pipeline.run(&mut session).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(session.state(), PipelineState::Cancelled);
    assert_eq!(service.call_count(), 0);
    assert!(report_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_evaluation_failure_keeps_research() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(MockCompletionService::from_fn(|prompt, _| {
        if is_planning(prompt) {
            Ok("1. Alpha\n".to_string())
        } else if is_evaluation(prompt) {
            Err(ServiceError::ApiRequest {
                message: "bad request".into(),
            })
        } else {
            Ok("Alpha findings.".to_string())
        }
    }));
    let (pipeline, callback) = create_pipeline(service, dir.path());

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 1, 1).unwrap());
    let err = pipeline.run(&mut session).await.unwrap_err();

    assert!(matches!(err, PipelineError::Evaluation(_)));
    assert_eq!(session.state(), PipelineState::Failed);
    assert_eq!(session.failed_stage(), Some(PipelineState::Evaluating));
    assert!(session.error().unwrap().contains("bad request"));

    let partial = session.partial_research().unwrap();
    assert_eq!(partial.findings[0].text, "Alpha findings.");
    assert!(report_files(dir.path()).is_empty());

    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, PipelineState::Evaluating);
}

#[tokio::test]
async fn test_write_failure_then_retry() {
    let dir = TempDir::new().unwrap();
    let reports = dir.path().join("reports");
    std::fs::write(&reports, "occupied").unwrap();

    let service = Arc::new(scripted_service("1. Alpha\n"));
    let (pipeline, _) = create_pipeline(service.clone(), &reports);

    let mut session = pipeline.start_session(ResearchRequest::new("Harbor", 1, 1).unwrap());
    let err = pipeline.run(&mut session).await.unwrap_err();
    assert!(matches!(err, PipelineError::Writing(_)));
    assert_eq!(session.failed_stage(), Some(PipelineState::Writing));
    let calls_before_retry = service.call_count();

    std::fs::remove_file(&reports).unwrap();
    let artifact = pipeline.retry_write(&mut session).unwrap();

    assert_eq!(session.state(), PipelineState::Done);
    assert!(artifact.saved_path.starts_with(&reports));
    assert_eq!(report_files(&reports).len(), 1);
    // Retrying the write never calls the model again.
    assert_eq!(service.call_count(), calls_before_retry);
}
