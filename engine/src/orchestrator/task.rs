//! Task model and status state machine
//!
//! A task moves strictly forward:
//!
//! ```text
//! Pending -> Planning -> Executing -> Completed
//!    |          |           |      -> Failed
//!    +----------+-----------+----> Paused -> Failed
//! ```
//!
//! Every status change goes through [`Task::transition`], which rejects
//! backward moves, skipped phases and any move out of a terminal state.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{ActionParams, ActionResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Planning)
                | (Pending, Paused)
                | (Pending, Failed)
                | (Planning, Executing)
                | (Planning, Paused)
                | (Planning, Failed)
                | (Executing, Completed)
                | (Executing, Paused)
                | (Executing, Failed)
                | (Paused, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned action invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub parameters: ActionParams,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub rationale: String,
}

impl Step {
    pub fn new(action: impl Into<String>, parameters: ActionParams) -> Self {
        Self {
            action: action.into(),
            parameters,
            expected_outcome: String::new(),
            rationale: String::new(),
        }
    }

    pub fn expecting(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = outcome.into();
        self
    }

    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Whether a log entry records a planned step or a recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Step,
    Recovery,
}

/// Entry in a task's execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// 1-based index of the plan step this entry belongs to
    pub step_index: usize,
    pub kind: EntryKind,
    pub step: Step,
    pub result: ActionResult,
    pub timestamp: DateTime<Utc>,
    /// Action of the failed step a recovery entry stands in for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

/// A unit of work submitted to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub plan: Vec<Step>,
    pub actions: Vec<ActionLogEntry>,
    pub context: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(goal: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            status: TaskStatus::Pending,
            plan: Vec::new(),
            actions: Vec::new(),
            context,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
        }
    }

    /// Move to `next`, rejecting anything that is not a forward transition
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(task_id = %self.id, from = %self.status, to = %next, "Task status changed");
        self.status = next;
        Ok(())
    }

    /// Mark the task failed with `error`, unless it already terminated
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and end, or until now while running
    pub fn duration_seconds(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Action names of the plan in order
    pub fn strategy(&self) -> Vec<&str> {
        self.plan.iter().map(|s| s.action.as_str()).collect()
    }
}
