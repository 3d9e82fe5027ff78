//! One-shot recovery after a failed step

use sdk::types::{ActionParams, ActionResult, ActionSpec};
use sdk::EngineError;
use serde::{Deserialize, Serialize};

use super::task::Step;
use crate::llm::extract_json;

/// Replacement action proposed for a failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub alternative_action: String,
    #[serde(default)]
    pub parameters: ActionParams,
    #[serde(default)]
    pub reasoning: String,
}

impl Alternative {
    /// The alternative as a plan step standing in for `failed`
    pub fn into_step(self, failed: &Step) -> Step {
        Step::new(self.alternative_action, self.parameters)
            .expecting(failed.expected_outcome.clone())
            .because(self.reasoning)
    }
}

pub fn build_prompt(goal: &str, failed: &Step, result: &ActionResult, actions: &[ActionSpec]) -> String {
    let parameters =
        serde_json::to_string(&failed.parameters).unwrap_or_else(|_| "{}".to_string());
    let names: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();

    format!(
        r#"The following step failed during task execution.

TASK GOAL: {goal}
FAILED STEP: {action}
PARAMETERS: {parameters}
ERROR: {error}

AVAILABLE ACTIONS: {names}

Suggest one alternative that achieves the same outcome: a different action,
the same action with modified parameters, or a workaround.

Respond with JSON only:
{{
  "alternative_action": "action_name",
  "parameters": {{"param1": "value1"}},
  "reasoning": "Why this alternative should work"
}}"#,
        action = failed.action,
        error = result.error_text(),
        names = names.join(", "),
    )
}

/// Decode an alternative, which must name a registered action
pub fn parse_alternative(content: &str, actions: &[ActionSpec]) -> Result<Alternative, EngineError> {
    let json = extract_json(content, '{', '}')
        .ok_or_else(|| EngineError::Parse("no JSON object in recovery reply".to_string()))?;
    let alternative: Alternative =
        serde_json::from_str(json).map_err(|e| EngineError::Parse(e.to_string()))?;

    if !actions
        .iter()
        .any(|a| a.name == alternative.alternative_action)
    {
        return Err(EngineError::Validation(format!(
            "recovery proposed unknown action '{}'",
            alternative.alternative_action
        )));
    }

    Ok(alternative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ActionSpec> {
        ["read_file", "list_directory"]
            .iter()
            .map(|n| ActionSpec {
                name: n.to_string(),
                description: String::new(),
                parameters: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_parse_alternative() {
        let reply = r#"Try this: {"alternative_action": "list_directory",
            "parameters": {"path": "."}, "reasoning": "see what exists"}"#;
        let alt = parse_alternative(reply, &specs()).unwrap();
        assert_eq!(alt.alternative_action, "list_directory");
        assert_eq!(alt.parameters.str("path").unwrap(), ".");
    }

    #[test]
    fn test_parse_alternative_rejects_unregistered() {
        let reply = r#"{"alternative_action": "rm", "parameters": {}}"#;
        let err = parse_alternative(reply, &specs()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_prompt_mentions_failure() {
        let step = Step::new("read_file", ActionParams::new().with("path", json!("x.txt")));
        let prompt = build_prompt(
            "read x",
            &step,
            &ActionResult::failed("No such file"),
            &specs(),
        );
        assert!(prompt.contains("FAILED STEP: read_file"));
        assert!(prompt.contains("No such file"));
        assert!(prompt.contains("read_file, list_directory"));
    }

    #[test]
    fn test_into_step_keeps_expected_outcome() {
        let failed = Step::new("read_file", ActionParams::new()).expecting("file contents");
        let alt = Alternative {
            alternative_action: "list_directory".to_string(),
            parameters: ActionParams::new(),
            reasoning: "look first".to_string(),
        };
        let step = alt.into_step(&failed);
        assert_eq!(step.action, "list_directory");
        assert_eq!(step.expected_outcome, "file contents");
        assert_eq!(step.rationale, "look first");
    }
}
