//! Task orchestrator
//!
//! Accepts goals, queues them, and runs one task at a time through
//! planning, step execution with decision evaluation, one-shot recovery and
//! finalization into memory.
//!
//! Submission only touches the active map and the queue channel; the
//! dispatch loop is the only place task state changes. Finalization runs
//! exactly once per task, including when a step panics.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use sdk::types::ActionResult;
use sdk::EngineError;

use crate::actions::ActionExecutor;
use crate::config::OrchestratorConfig;
use crate::events::{Event, EventBus};
use crate::llm::{GenerationRequest, Generator, UsageStats};
use crate::memory::{MemoryStats, MemoryStore, TaskEpisode};
use crate::strategy::{DecisionPoint, DecisionStrategy};

pub mod planner;
pub mod recovery;
pub mod task;

pub use task::{ActionLogEntry, EntryKind, Step, Task, TaskStatus};

/// Longest result text kept on a completed task
const MAX_RESULT_CHARS: usize = 2000;

/// Snapshot returned by [`Orchestrator::status`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub active_task_count: usize,
    pub queued_task_count: usize,
    pub memory: MemoryStats,
    pub usage: UsageStats,
}

pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    executor: Arc<dyn ActionExecutor>,
    memory: Arc<MemoryStore>,
    strategy: Arc<DecisionStrategy>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    tasks: RwLock<HashMap<String, Task>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    queued: AtomicUsize,
    running: AtomicBool,
    accepting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn ActionExecutor>,
        memory: Arc<MemoryStore>,
        strategy: Arc<DecisionStrategy>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            generator,
            executor,
            memory,
            strategy,
            events,
            config,
            tasks: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queued: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            shutdown,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Queue a goal; returns the pending task immediately
    pub async fn submit(
        &self,
        goal: impl Into<String>,
        context: Option<Map<String, Value>>,
    ) -> Result<Task, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let task = Task::new(goal, context.unwrap_or_default());
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());

        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.queue_tx.send(task.id.clone()).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.tasks.write().await.remove(&task.id);
            return Err(EngineError::ShuttingDown);
        }

        info!(task_id = %task.id, "Task submitted: {}", task.goal);
        self.events
            .publish(Event::TaskSubmitted {
                task_id: task.id.clone(),
                goal: task.goal.clone(),
            })
            .await;

        Ok(task)
    }

    /// Spawn the dispatch loop; it can only be started once
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, EngineError> {
        let mut queue = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Validation("dispatch loop already started".into()))?;
        let mut shutdown = self.shutdown.subscribe();
        let this = Arc::clone(self);

        this.running.store(true, Ordering::SeqCst);
        info!("Orchestrator started");

        Ok(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    next = queue.recv() => match next {
                        Some(task_id) => {
                            this.queued.fetch_sub(1, Ordering::SeqCst);
                            this.dispatch(&task_id).await;
                        }
                        None => break,
                    },
                }
            }

            this.running.store(false, Ordering::SeqCst);
            info!(
                queued = this.queued.load(Ordering::SeqCst),
                "Orchestrator stopped"
            );
        }))
    }

    /// Refuse new submissions and let the in-flight task finish
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let memory = match self.memory.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Memory stats unavailable: {}", e);
                MemoryStats::default()
            }
        };

        OrchestratorStatus {
            running: self.running.load(Ordering::SeqCst),
            active_task_count: self.tasks.read().await.len(),
            queued_task_count: self.queued.load(Ordering::SeqCst),
            memory,
            usage: self.generator.usage().await,
        }
    }

    /// Snapshot of an active task
    pub async fn task(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    async fn dispatch(&self, task_id: &str) {
        let Some(task) = self.task(task_id).await else {
            warn!(task_id, "Queued task is no longer active");
            return;
        };
        self.execute_task(task).await;
    }

    /// Run `task` to a terminal state and finalize it
    pub async fn execute_task(&self, mut task: Task) -> Task {
        let span = info_span!("task", task_id = %task.id);

        async move {
            info!("Executing task: {}", task.goal);
            self.events
                .publish(Event::TaskStarted {
                    task_id: task.id.clone(),
                })
                .await;

            let outcome = AssertUnwindSafe(self.drive(&mut task)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => task.fail(e.to_string()),
                Err(panic) => task.fail(format!("Task panicked: {}", panic_message(&*panic))),
            }

            self.finalize(&mut task).await;
            task
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, task: &mut Task) -> Result<(), EngineError> {
        task.transition(TaskStatus::Planning)?;
        self.sync(task).await;
        self.memory
            .set_context("current_task", json!(task.goal))
            .await;

        task.plan = self.plan(task).await;
        info!(steps = task.plan.len(), "Plan ready: {:?}", task.strategy());

        task.transition(TaskStatus::Executing)?;
        self.sync(task).await;

        let plan = task.plan.clone();
        for (i, step) in plan.iter().enumerate() {
            let n = i + 1;

            let mut context = task.context.clone();
            context.insert(
                "current_step".to_string(),
                serde_json::to_value(step).map_err(|e| EngineError::Parse(e.to_string()))?,
            );
            let decision = self
                .strategy
                .evaluate(&task.goal, std::slice::from_ref(&step.action), &context)
                .await;

            let result = self
                .run_action(step)
                .await
                .with_metadata("decision", decision_summary(&decision));
            task.actions.push(log_entry(n, EntryKind::Step, step, &result, None));
            self.record_step(task, step, &decision, &result).await;

            self.events
                .publish(Event::StepCompleted {
                    task_id: task.id.clone(),
                    step_index: n,
                    action: step.action.clone(),
                    success: result.success,
                })
                .await;

            if result.success {
                self.merge_result(task, n, &result).await;
            } else {
                warn!(step = n, action = %step.action, "Step failed: {}", result.error_text());
                match self.recover(task, n, step, &result).await {
                    Some(alternative) => self.merge_result(task, n, &alternative).await,
                    None => {
                        task.fail(format!("Failed at step {}: {}", n, result.error_text()));
                        return Ok(());
                    }
                }
            }

            self.sync(task).await;
        }

        task.result = Some(completion_summary(task));
        task.transition(TaskStatus::Completed)
    }

    async fn plan(&self, task: &Task) -> Vec<Step> {
        let relevant = match self
            .memory
            .relevant_context(&task.goal, self.config.context_limit)
            .await
        {
            Ok(relevant) => relevant,
            Err(e) => {
                warn!("Planning context unavailable: {}", e);
                Vec::new()
            }
        };

        let actions = self.executor.list_actions();
        let prompt = planner::build_prompt(&task.goal, &actions, &relevant, &task.context);
        debug!(prompt_chars = prompt.len(), "Requesting plan");

        let response = self
            .generator
            .generate(GenerationRequest::new(prompt).with_system(planner::SYSTEM_PROMPT))
            .await;

        if response.success {
            match planner::parse_plan(&response.content, &actions) {
                Ok(plan) => return plan,
                Err(e) => warn!("Unusable plan from model, using fallback: {}", e),
            }
        } else {
            warn!(
                "Planner unavailable, using fallback: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
        }

        planner::fallback_plan(&task.goal)
    }

    async fn run_action(&self, step: &Step) -> ActionResult {
        let timeout = Duration::from_secs(self.config.action_timeout_secs);
        match tokio::time::timeout(timeout, self.executor.execute(&step.action, &step.parameters))
            .await
        {
            Ok(result) => result,
            Err(_) => ActionResult::failed(
                EngineError::ActionTimeout(self.config.action_timeout_secs).to_string(),
            ),
        }
    }

    /// Ask for one alternative and run it; `Some` only if it succeeded
    async fn recover(
        &self,
        task: &mut Task,
        n: usize,
        failed: &Step,
        result: &ActionResult,
    ) -> Option<ActionResult> {
        let actions = self.executor.list_actions();
        let prompt = recovery::build_prompt(&task.goal, failed, result, &actions);

        let response = self.generator.generate(GenerationRequest::new(prompt)).await;
        if !response.success {
            warn!(
                "Recovery unavailable: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
            return None;
        }

        let alternative = match recovery::parse_alternative(&response.content, &actions) {
            Ok(alternative) => alternative,
            Err(e) => {
                warn!("Rejected recovery proposal: {}", e);
                return None;
            }
        };

        info!(step = n, "Trying alternative: {}", alternative.alternative_action);
        let step = alternative.into_step(failed);
        let outcome = self.run_action(&step).await;

        if outcome.success {
            info!(step = n, "Alternative succeeded");
            task.actions.push(log_entry(
                n,
                EntryKind::Recovery,
                &step,
                &outcome,
                Some(failed.action.clone()),
            ));
            Some(outcome)
        } else {
            warn!(step = n, "Alternative failed: {}", outcome.error_text());
            None
        }
    }

    async fn record_step(
        &self,
        task: &Task,
        step: &Step,
        decision: &DecisionPoint,
        result: &ActionResult,
    ) {
        let verdict = if result.success { "Success" } else { "Failed" };
        let mut metadata = Map::new();
        metadata.insert("task_id".into(), json!(task.id));
        metadata.insert("action".into(), json!(step.action));
        metadata.insert("decision_reasoning".into(), json!(decision.reasoning));
        metadata.insert("success".into(), json!(result.success));

        if let Err(e) = self
            .memory
            .add_short_term(&format!("Step: {} -> {}", step.action, verdict), Some(metadata))
            .await
        {
            warn!("Failed to record step memory: {}", e);
        }
    }

    async fn merge_result(&self, task: &mut Task, n: usize, result: &ActionResult) {
        let key = format!("step_{}", n);
        task.context.insert(key.clone(), result.result.clone());
        self.memory.set_context(key, result.result.clone()).await;
    }

    async fn sync(&self, task: &Task) {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
    }

    async fn finalize(&self, task: &mut Task) {
        if !task.is_terminal() {
            task.fail("Task ended without reaching a terminal state");
        }
        let end_time = Utc::now();
        task.end_time = Some(end_time);
        let success = task.status == TaskStatus::Completed;

        let mut metadata = Map::new();
        metadata.insert("end_status".into(), json!(task.status.as_str()));
        metadata.insert("action_count".into(), json!(task.actions.len()));
        metadata.insert("context".into(), Value::Object(task.context.clone()));

        let episode = TaskEpisode {
            id: task.id.clone(),
            goal: task.goal.clone(),
            plan: task.plan.clone(),
            actions: task.actions.clone(),
            result: task
                .result
                .clone()
                .or_else(|| task.error.clone())
                .unwrap_or_else(|| "No result".to_string()),
            success,
            duration_seconds: task.duration_seconds(),
            timestamp: end_time,
            metadata,
        };

        if let Err(e) = self.memory.store_episode(&episode).await {
            warn!("Failed to store episode: {}", e);
        }

        if success {
            let mut learning = Map::new();
            learning.insert("type".into(), json!("successful_strategy"));
            learning.insert(
                "task_type".into(),
                json!(planner::classify_task_type(&task.goal)),
            );
            learning.insert("duration".into(), json!(episode.duration_seconds));

            let content = format!(
                "Successfully completed: {}. Strategy: [{}]",
                task.goal,
                task.strategy().join(", ")
            );
            if let Err(e) = self.memory.add_long_term(&content, 0.8, Some(learning)).await {
                warn!("Failed to store strategy memory: {}", e);
            }
        }

        self.memory.clear_context().await;
        self.tasks.write().await.remove(&task.id);

        info!(
            status = %task.status,
            duration_secs = episode.duration_seconds,
            actions = task.actions.len(),
            "Task finished"
        );

        let snapshot = Box::new(task.clone());
        let event = if success {
            Event::TaskCompleted(snapshot)
        } else {
            Event::TaskFailed(snapshot)
        };
        self.events.publish(event).await;
    }
}

fn log_entry(
    step_index: usize,
    kind: EntryKind,
    step: &Step,
    result: &ActionResult,
    replaces: Option<String>,
) -> ActionLogEntry {
    ActionLogEntry {
        step_index,
        kind,
        step: step.clone(),
        result: result.clone(),
        timestamp: Utc::now(),
        replaces,
    }
}

fn decision_summary(decision: &DecisionPoint) -> Value {
    json!({
        "selected_option": decision.selected_option,
        "expected_value": decision.expected_value,
        "source": decision.source,
    })
}

/// Output of the last successful entry, as text
fn completion_summary(task: &Task) -> String {
    let last = task
        .actions
        .iter()
        .rev()
        .find(|entry| entry.result.success)
        .map(|entry| &entry.result.result);

    let text = match last {
        None | Some(Value::Null) => return "Task completed successfully".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    if text.chars().count() > MAX_RESULT_CHARS {
        let mut truncated: String = text.chars().take(MAX_RESULT_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        text
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::ActionParams;

    fn task_with(entries: Vec<ActionResult>) -> Task {
        let mut task = Task::new("goal", Map::new());
        for (i, result) in entries.into_iter().enumerate() {
            let step = Step::new("a", ActionParams::new());
            task.actions
                .push(log_entry(i + 1, EntryKind::Step, &step, &result, None));
        }
        task
    }

    #[test]
    fn test_completion_summary_uses_last_success() {
        let task = task_with(vec![
            ActionResult::ok(json!("first")),
            ActionResult::ok(json!({"answer": 42})),
            ActionResult::failed("boom"),
        ]);
        assert_eq!(completion_summary(&task), r#"{"answer":42}"#);
    }

    #[test]
    fn test_completion_summary_null_and_truncation() {
        let null = task_with(vec![ActionResult::ok(Value::Null)]);
        assert_eq!(completion_summary(&null), "Task completed successfully");

        let long = task_with(vec![ActionResult::ok(json!("y".repeat(5000)))]);
        let summary = completion_summary(&long);
        assert_eq!(summary.chars().count(), MAX_RESULT_CHARS + 3);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        assert_eq!(panic_message(&*payload), "kaboom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
    }
}
