//! Aspect planning: expand a topic into a bounded list of research aspects.
//!
//! One completion call asks for a numbered list of distinct aspects. The
//! reply is parsed leniently, deduplicated, and truncated to the requested
//! breadth. A short reply is padded from a fixed list of generic aspects so
//! the plan always holds exactly `breadth` entries.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::error::{PlanningError, ServiceError};
use crate::types::{Message, ResearchRequest};

/// A list item: `1.`, `1)`, `-`, `*` or `•`, followed by text.
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("list item pattern is valid")
});

/// One distinct facet of a topic, researched by its own chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aspect {
    pub name: String,
    /// Position in the plan; fixes report ordering.
    pub ordinal: usize,
}

const PLANNER_SYSTEM_PROMPT: &str = "You are a research planner. You break a topic into \
distinct, non-overlapping aspects that together give a complete picture of it.";

/// Plans the aspects of a research request.
#[derive(Clone)]
pub struct AspectPlanner {
    client: CompletionClient,
}

impl AspectPlanner {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// Produce exactly `request.breadth()` aspects with ordinals `0..breadth`.
    pub async fn plan(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Aspect>, PlanningError> {
        let topic = request.topic();
        let breadth = usize::from(request.breadth());
        let prompt = planning_prompt(topic, breadth);
        let context = [Message::system(PLANNER_SYSTEM_PROMPT)];

        let reply = self
            .client
            .generate(&prompt, &context, cancel)
            .await
            .map_err(|e| match e {
                ServiceError::Cancelled => PlanningError::Cancelled,
                source => PlanningError::Service {
                    topic: topic.to_string(),
                    source,
                },
            })?;

        let parsed = parse_aspect_list(&reply);
        debug!(parsed = parsed.len(), breadth, "Parsed aspect list");
        if parsed.len() < breadth {
            warn!(
                topic,
                parsed = parsed.len(),
                breadth,
                "Planner returned too few aspects, padding with generic aspects"
            );
        }

        let aspects = assemble_plan(topic, parsed, breadth);
        info!(topic, count = aspects.len(), "Aspect plan ready");
        Ok(aspects)
    }
}

fn planning_prompt(topic: &str, breadth: usize) -> String {
    format!(
        "Break down the following research topic into exactly {breadth} distinct aspects \
         that should be investigated.\n\n\
         Topic: {topic}\n\n\
         Return a numbered list with one short aspect title per line and nothing else."
    )
}

/// Extract list items from a model reply.
///
/// Accepts numbered and bulleted items, strips markdown emphasis and a
/// trailing colon, and drops case-insensitive duplicates while keeping order.
pub fn parse_aspect_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_item(m.as_str()))
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

fn clean_item(raw: &str) -> String {
    raw.replace("**", "")
        .replace("__", "")
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// The ten generic aspects used to pad a short plan, in padding order.
pub fn generic_aspects(topic: &str) -> Vec<String> {
    vec![
        format!("Current state and overview of {topic}"),
        format!("Recent developments and trends in {topic}"),
        format!("Key challenges and opportunities in {topic}"),
        format!("Future implications and predictions for {topic}"),
        format!("Expert opinions and analysis on {topic}"),
        format!("Technical aspects and specifications of {topic}"),
        format!("Economic and market impact of {topic}"),
        format!("Social and cultural effects of {topic}"),
        format!("Regulatory and legal considerations for {topic}"),
        format!("Comparative analysis and alternatives to {topic}"),
    ]
}

/// Truncate or pad `parsed` to exactly `breadth` unique aspects.
fn assemble_plan(topic: &str, parsed: Vec<String>, breadth: usize) -> Vec<Aspect> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names: Vec<String> = Vec::with_capacity(breadth);

    let candidates = parsed.into_iter().chain(generic_aspects(topic));
    for name in candidates {
        if names.len() == breadth {
            break;
        }
        if seen.insert(name.to_lowercase()) {
            names.push(name);
        }
    }

    // Only reachable past ten aspects, which request clamping rules out.
    let mut extra = 1;
    while names.len() < breadth {
        let name = format!("Additional perspective {extra} on {topic}");
        if seen.insert(name.to_lowercase()) {
            names.push(name);
        }
        extra += 1;
    }

    names
        .into_iter()
        .enumerate()
        .map(|(ordinal, name)| Aspect { name, ordinal })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockCompletionService;
    use crate::config::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn planner(service: Arc<MockCompletionService>) -> AspectPlanner {
        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        AspectPlanner::new(CompletionClient::new(service, retry, Duration::from_secs(5)))
    }

    #[test]
    fn test_parse_numbered_and_bulleted() {
        let reply = "Here are the aspects:\n\
                     1. Structural history\n\
                     2) **Flood exposure**\n\
                     - Crime statistics:\n\
                     * Local economy\n\
                     • Zoning rules\n\
                     Some trailing prose.";
        assert_eq!(
            parse_aspect_list(reply),
            vec![
                "Structural history",
                "Flood exposure",
                "Crime statistics",
                "Local economy",
                "Zoning rules",
            ]
        );
    }

    #[test]
    fn test_parse_dedupes_case_insensitively() {
        let reply = "1. Seismic risk\n2. seismic RISK\n3. Tourism";
        assert_eq!(parse_aspect_list(reply), vec!["Seismic risk", "Tourism"]);
    }

    #[test]
    fn test_parse_ignores_prose() {
        assert!(parse_aspect_list("No list here at all.\n2024 was a big year").is_empty());
    }

    #[test]
    fn test_assemble_truncates() {
        let parsed = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let plan = assemble_plan("Topic", parsed, 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1], Aspect { name: "B".into(), ordinal: 1 });
    }

    #[test]
    fn test_assemble_pads_with_generics() {
        let parsed = vec!["Foundation condition".to_string()];
        let plan = assemble_plan("Hoover Dam", parsed, 3);
        let names: Vec<&str> = plan.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Foundation condition",
                "Current state and overview of Hoover Dam",
                "Recent developments and trends in Hoover Dam",
            ]
        );
        let ordinals: Vec<usize> = plan.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_assemble_skips_generic_already_present() {
        let parsed = vec!["current state and overview of Pier 39".to_string()];
        let plan = assemble_plan("Pier 39", parsed, 2);
        assert_eq!(plan[1].name, "Recent developments and trends in Pier 39");
    }

    #[test]
    fn test_assemble_full_breadth_from_nothing() {
        let plan = assemble_plan("Alcatraz", Vec::new(), 10);
        assert_eq!(plan.len(), 10);
        assert_eq!(plan[9].name, "Comparative analysis and alternatives to Alcatraz");
    }

    #[tokio::test]
    async fn test_plan_uses_service_reply() {
        let service = Arc::new(MockCompletionService::with_response(
            "1. Structural integrity\n2. Visitor safety\n3. Flood exposure\n4. Extra",
        ));
        let request = ResearchRequest::new("Brooklyn Bridge", 3, 1).unwrap();

        let plan = planner(service.clone())
            .plan(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].name, "Flood exposure");

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("Brooklyn Bridge"));
        assert!(calls[0].prompt.contains("exactly 3"));
    }

    #[tokio::test]
    async fn test_plan_service_failure_is_planning_error() {
        let service = Arc::new(MockCompletionService::from_fn(|_, _| {
            Err(ServiceError::AuthFailed {
                provider: "azure".into(),
            })
        }));
        let request = ResearchRequest::with_defaults("Brooklyn Bridge").unwrap();

        let err = planner(service)
            .plan(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::Service { ref topic, .. } if topic == "Brooklyn Bridge"));
    }

    #[tokio::test]
    async fn test_plan_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ResearchRequest::with_defaults("Brooklyn Bridge").unwrap();

        let err = planner(Arc::new(MockCompletionService::new()))
            .plan(&request, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::Cancelled));
    }
}
