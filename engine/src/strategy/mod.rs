//! Decision strategy
//!
//! Scores candidate actions for a goal. The generation collaborator is asked
//! for a success probability and a risk score per candidate; when it is
//! unreachable, returns something that does not decode, or breaks the
//! contract (missing candidates, values outside [0, 1], a selection outside
//! the candidate set), the static prior table from `[strategy]` is used.
//!
//! Both paths rank with the same rule:
//!
//! ```text
//! expected_value = success_probability * (1 - risk_score)
//! ```
//!
//! The highest expected value wins and ties go to the earlier candidate. The
//! strategy holds no mutable state and can be shared freely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use sdk::errors::EngineError;

use crate::config::StrategyConfig;
use crate::llm::{extract_json, GenerationRequest, Generator};
use crate::memory::{MemoryStore, RelevantContext};

const SYSTEM_PROMPT: &str = "You are an expert decision-making system. For every candidate \
action, maximize the probability of success while minimizing the risk of failure. Reply with \
JSON only.";

/// Where a decision's scores came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Model,
    Heuristic,
}

/// One scored candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOption {
    pub action: String,
    pub success_probability: f64,
    pub risk_score: f64,
    pub expected_value: f64,
    pub reasoning: String,
}

impl ScoredOption {
    pub fn new(action: impl Into<String>, success_probability: f64, risk_score: f64) -> Self {
        Self {
            action: action.into(),
            success_probability,
            risk_score,
            expected_value: expected_value(success_probability, risk_score),
            reasoning: String::new(),
        }
    }
}

/// Result of evaluating a set of candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub options: Vec<ScoredOption>,
    pub risk_assessment: BTreeMap<String, f64>,
    pub expected_value: BTreeMap<String, f64>,
    pub selected_option: Option<String>,
    pub reasoning: String,
    pub source: DecisionSource,
}

impl DecisionPoint {
    /// Build from scored options, selecting the maximum expected value
    pub fn from_options(
        options: Vec<ScoredOption>,
        reasoning: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        let selected_option = select(&options).map(|o| o.action.clone());
        let risk_assessment = options
            .iter()
            .map(|o| (o.action.clone(), o.risk_score))
            .collect();
        let expected_value = options
            .iter()
            .map(|o| (o.action.clone(), o.expected_value))
            .collect();

        Self {
            options,
            risk_assessment,
            expected_value,
            selected_option,
            reasoning: reasoning.into(),
            source,
        }
    }
}

pub fn expected_value(success_probability: f64, risk_score: f64) -> f64 {
    success_probability * (1.0 - risk_score)
}

/// Highest expected value, first one on ties
pub fn select(options: &[ScoredOption]) -> Option<&ScoredOption> {
    options.iter().fold(None, |best, option| match best {
        Some(current) if current.expected_value >= option.expected_value => Some(current),
        _ => Some(option),
    })
}

/// Candidates with duplicates removed, keeping first occurrence order
fn distinct(candidates: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .map(String::as_str)
        .filter(|c| seen.insert(*c))
        .collect()
}

#[derive(Debug, Deserialize)]
struct ModelEvaluation {
    options: Vec<ModelOption>,
    #[serde(default, alias = "selected_action")]
    selected_option: Option<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct ModelOption {
    action: String,
    success_probability: f64,
    risk_score: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct DecisionStrategy {
    generator: Arc<dyn Generator>,
    memory: Arc<MemoryStore>,
    config: StrategyConfig,
    context_limit: usize,
}

impl DecisionStrategy {
    pub fn new(
        generator: Arc<dyn Generator>,
        memory: Arc<MemoryStore>,
        config: StrategyConfig,
        context_limit: usize,
    ) -> Self {
        Self {
            generator,
            memory,
            config,
            context_limit,
        }
    }

    /// Score `candidates` for `goal`; never fails
    pub async fn evaluate(
        &self,
        goal: &str,
        candidates: &[String],
        context: &Map<String, Value>,
    ) -> DecisionPoint {
        let candidates = distinct(candidates);
        if candidates.is_empty() {
            return DecisionPoint::from_options(
                Vec::new(),
                "No candidate actions",
                DecisionSource::Heuristic,
            );
        }

        let history = match self.memory.relevant_context(goal, self.context_limit).await {
            Ok(history) => history,
            Err(e) => {
                warn!("Decision context unavailable: {}", e);
                Vec::new()
            }
        };

        let prompt = build_prompt(goal, &candidates, context, &history);
        let response = self
            .generator
            .generate(
                GenerationRequest::new(prompt)
                    .with_system(SYSTEM_PROMPT)
                    .with_max_tokens(2048),
            )
            .await;

        if !response.success {
            debug!(
                "Decision model unavailable, using priors: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
            return self.heuristic(&candidates);
        }

        match parse_evaluation(&response.content, &candidates) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Rejected model decision, using priors: {}", e);
                self.heuristic(&candidates)
            }
        }
    }

    /// Prior-table evaluation used whenever the model path fails
    pub fn heuristic<S: AsRef<str>>(&self, candidates: &[S]) -> DecisionPoint {
        let options = candidates
            .iter()
            .map(|c| {
                let action = c.as_ref();
                let prior = self.prior(action);
                let mut option = ScoredOption::new(action, prior, 1.0 - prior);
                option.reasoning = format!("Heuristic evaluation for {}", action);
                option
            })
            .collect();

        DecisionPoint::from_options(
            options,
            "Fallback heuristic evaluation",
            DecisionSource::Heuristic,
        )
    }

    pub fn prior(&self, action: &str) -> f64 {
        self.config
            .action_priors
            .get(action)
            .copied()
            .unwrap_or(self.config.default_prior)
    }
}

fn build_prompt(
    goal: &str,
    candidates: &[&str],
    context: &Map<String, Value>,
    history: &[RelevantContext],
) -> String {
    let context_json = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "TASK GOAL: {}\n\nCANDIDATE ACTIONS: {}\n\nCURRENT CONTEXT:\n{}\n\nHISTORICAL CONTEXT:\n",
        goal,
        candidates.join(", "),
        context_json
    );

    if history.is_empty() {
        prompt.push_str("- none\n");
    }
    for entry in history {
        let snippet: String = entry.content.chars().take(200).collect();
        prompt.push_str(&format!("- {}: {}...\n", entry.kind.as_str(), snippet));
    }

    prompt.push_str(
        r#"
For EVERY candidate action estimate:
1. success_probability: likelihood the action advances the goal (0.0-1.0)
2. risk_score: likelihood of failure, errors or wasted effort (0.0-1.0)

Respond with exactly this JSON shape:
{
  "options": [
    {"action": "action_name", "success_probability": 0.85, "risk_score": 0.2, "reasoning": "why"}
  ],
  "selected_option": "action_name",
  "reasoning": "overall reasoning"
}

expected value = success_probability * (1 - risk_score); select the highest.
"#,
    );

    prompt
}

/// Decode and validate a model evaluation against `candidates`
fn parse_evaluation(content: &str, candidates: &[&str]) -> Result<DecisionPoint, EngineError> {
    let json = extract_json(content, '{', '}')
        .ok_or_else(|| EngineError::Parse("no JSON object in response".to_string()))?;
    let evaluation: ModelEvaluation =
        serde_json::from_str(json).map_err(|e| EngineError::Parse(e.to_string()))?;

    if let Some(selected) = &evaluation.selected_option {
        if !candidates.contains(&selected.as_str()) {
            return Err(EngineError::Validation(format!(
                "selected action '{}' is not a candidate",
                selected
            )));
        }
    }

    let mut options = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let scored = evaluation
            .options
            .iter()
            .find(|o| o.action == *candidate)
            .ok_or_else(|| {
                EngineError::Validation(format!("no score for candidate '{}'", candidate))
            })?;

        for (name, value) in [
            ("success_probability", scored.success_probability),
            ("risk_score", scored.risk_score),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Validation(format!(
                    "{} for '{}' out of range: {}",
                    name, candidate, value
                )));
            }
        }

        let mut option =
            ScoredOption::new(*candidate, scored.success_probability, scored.risk_score);
        option.reasoning = scored.reasoning.clone();
        options.push(option);
    }

    Ok(DecisionPoint::from_options(
        options,
        evaluation.reasoning,
        DecisionSource::Model,
    ))
}
