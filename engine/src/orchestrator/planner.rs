//! Plan construction
//!
//! The model is asked for a JSON array of steps. Replies are decoded
//! strictly; anything unusable is replaced by a keyword plan that is never
//! empty.

use sdk::types::{ActionParams, ActionSpec};
use sdk::EngineError;
use serde_json::{json, Map, Value};

use super::task::Step;
use crate::llm::extract_json;
use crate::memory::RelevantContext;

pub const SYSTEM_PROMPT: &str = "You are an expert task planner. Create efficient, step-by-step \
plans that minimize risk while maximizing success probability.";

pub fn build_prompt(
    goal: &str,
    actions: &[ActionSpec],
    relevant: &[RelevantContext],
    working: &Map<String, Value>,
) -> String {
    let actions_json = serde_json::to_string_pretty(actions).unwrap_or_else(|_| "[]".to_string());
    let snippets: Vec<String> = relevant
        .iter()
        .map(|ctx| ctx.content.chars().take(100).collect())
        .collect();
    let snippets_json = serde_json::to_string_pretty(&snippets).unwrap_or_else(|_| "[]".to_string());
    let working_json = serde_json::to_string_pretty(working).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"GOAL: {goal}

AVAILABLE ACTIONS:
{actions_json}

RELEVANT CONTEXT:
{snippets_json}

CURRENT CONTEXT:
{working_json}

Create a step-by-step plan to achieve the goal. Each step names one of the
available actions, its parameters and the expected outcome.

Respond with a JSON array only:
[
  {{
    "action": "action_name",
    "parameters": {{"param1": "value1"}},
    "expected_outcome": "What this step should accomplish",
    "rationale": "Why this step is necessary"
  }}
]

Keep the plan minimal but complete."#
    )
}

/// Decode a plan, rejecting empty plans and unknown actions
pub fn parse_plan(content: &str, actions: &[ActionSpec]) -> Result<Vec<Step>, EngineError> {
    let json = extract_json(content, '[', ']')
        .ok_or_else(|| EngineError::Parse("no JSON array in plan".to_string()))?;
    let plan: Vec<Step> =
        serde_json::from_str(json).map_err(|e| EngineError::Parse(e.to_string()))?;

    if plan.is_empty() {
        return Err(EngineError::Parse("plan has no steps".to_string()));
    }
    if let Some(step) = plan
        .iter()
        .find(|step| !actions.iter().any(|a| a.name == step.action))
    {
        return Err(EngineError::Parse(format!(
            "plan uses unknown action '{}'",
            step.action
        )));
    }

    Ok(plan)
}

/// Keyword plan used when the model cannot produce one
pub fn fallback_plan(goal: &str) -> Vec<Step> {
    let lower = goal.to_lowercase();
    let mut plan = Vec::new();

    if lower.contains("search") || lower.contains("find") {
        plan.push(
            Step::new(
                "search_web",
                ActionParams::new()
                    .with("query", json!(goal))
                    .with("num_results", json!(5)),
            )
            .expecting("Find relevant information")
            .because("Search for information related to the goal"),
        );
    }

    if lower.contains("file") || lower.contains("read") {
        plan.push(
            Step::new(
                "list_directory",
                ActionParams::new()
                    .with("path", json!("."))
                    .with("recursive", json!(false)),
            )
            .expecting("List current directory contents")
            .because("Explore available files"),
        );
    }

    if plan.is_empty() {
        plan.push(
            Step::new("get_system_info", ActionParams::new())
                .expecting("Get system information")
                .because("Gather basic system information to understand the environment"),
        );
    }

    plan
}

/// Coarse task category recorded with successful strategies
pub fn classify_task_type(goal: &str) -> &'static str {
    const CATEGORIES: &[(&[&str], &str)] = &[
        (&["search", "find", "look"], "information_gathering"),
        (&["write", "create", "generate"], "content_creation"),
        (&["analyze", "summarize", "process"], "data_processing"),
        (&["install", "setup", "configure"], "system_management"),
    ];

    let lower = goal.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or("general")
}
