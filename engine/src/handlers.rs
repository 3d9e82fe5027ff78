//! Command handlers for CLI operations
//!
//! Each handler prints plain text or, with `--json`, a pretty-printed JSON
//! document on stdout. Logs go to stderr so JSON output stays parseable.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::actions::{ActionExecutor, ActionRegistry};
use crate::config::Config;
use crate::daemon::{Daemon, SHUTDOWN_TIMEOUT};
use crate::events::{Event, EventType};
use crate::llm::LLMGateway;
use crate::memory::SearchScope;
use crate::orchestrator::{EntryKind, Task};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `--context` into a JSON object
pub fn parse_context(raw: Option<&str>) -> Result<Option<Map<String, Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw).context("Context is not valid JSON")? {
        Value::Object(map) => Ok(Some(map)),
        other => anyhow::bail!("Context must be a JSON object, got {}", other),
    }
}

fn print_task(task: &Task) {
    println!("Task {}: {}", task.id, task.status);
    println!("  Goal: {}", task.goal);
    for entry in &task.actions {
        let marker = if entry.result.success { "ok" } else { "FAILED" };
        let label = match entry.kind {
            EntryKind::Step => format!("step {}", entry.step_index),
            EntryKind::Recovery => format!("step {} (recovery)", entry.step_index),
        };
        println!("  [{}] {}: {}", marker, label, entry.step.action);
    }
    println!("  Duration: {:.2}s", task.duration_seconds());
    if let Some(result) = &task.result {
        println!("  Result: {}", result);
    }
    if let Some(error) = &task.error {
        println!("  Error: {}", error);
    }
}

/// Run one goal to completion
pub async fn handle_run(
    goal: String,
    context: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = parse_context(context.as_deref())?;

    let daemon = Daemon::build(config.clone()).await?;
    daemon.start().await?;
    let outcome = daemon.run_goal(&goal, context).await;
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;
    let task = outcome?;

    match format {
        OutputFormat::Text => print_task(&task),
        OutputFormat::Json => print_json(&task)?,
    }
    Ok(())
}

/// Run the agent until stdin closes or Ctrl-C, one goal per input line
pub async fn handle_start(config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = Daemon::build(config.clone()).await?;
    let mut events = daemon.events().subscribe(EventType::All).await;
    daemon.start().await?;

    if matches!(format, OutputFormat::Text) {
        eprintln!("Praxis is running. Enter one goal per line, Ctrl-D to finish.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: HashSet<String> = HashSet::new();
    let mut input_open = true;

    loop {
        if !input_open && pending.is_empty() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(goal) if goal.trim().is_empty() => {}
                Some(goal) => {
                    let task = daemon.orchestrator().submit(goal.trim(), None).await?;
                    pending.insert(task.id);
                }
                None => input_open = false,
            },
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(task) = event.finished_task() {
                    pending.remove(&task.id);
                }
                report_event(&event, format)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    daemon.shutdown(SHUTDOWN_TIMEOUT).await
}

fn report_event(event: &Event, format: OutputFormat) -> Result<()> {
    match (format, event) {
        (OutputFormat::Json, Event::TaskCompleted(task) | Event::TaskFailed(task)) => {
            println!("{}", serde_json::to_string(task)?);
        }
        (OutputFormat::Text, Event::TaskSubmitted { task_id, goal }) => {
            println!("Queued {}: {}", task_id, goal);
        }
        (
            OutputFormat::Text,
            Event::StepCompleted {
                task_id,
                step_index,
                action,
                success,
            },
        ) => {
            let marker = if *success { "ok" } else { "FAILED" };
            println!("  {} step {} [{}] {}", task_id, step_index, marker, action);
        }
        (OutputFormat::Text, Event::TaskCompleted(task) | Event::TaskFailed(task)) => {
            print_task(task);
        }
        _ => {}
    }
    Ok(())
}

/// Memory statistics, registered actions and provider health
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = Daemon::build(config.clone()).await?;
    let stats = daemon.memory().stats().await?;
    let action_count = daemon.registry().len();
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;

    let gateway = LLMGateway::from_config(&config.llm)?;
    let providers = gateway.health().await;

    match format {
        OutputFormat::Text => {
            println!("Memory:");
            println!("  Short-term: {}", stats.short_term);
            println!("  Long-term:  {}", stats.long_term);
            println!("  Episodic:   {}", stats.episodic);
            println!(
                "  Episodes:   {} ({} successful, {:.0}%)",
                stats.total_episodes,
                stats.successful_episodes,
                stats.success_rate * 100.0
            );
            println!("Actions: {}", action_count);
            println!("Providers:");
            for (name, healthy) in &providers {
                println!(
                    "  {:<10} {}",
                    name,
                    if *healthy { "available" } else { "unavailable" }
                );
            }
        }
        OutputFormat::Json => {
            let providers: Map<String, Value> = providers
                .into_iter()
                .map(|(name, healthy)| (name, Value::Bool(healthy)))
                .collect();
            print_json(&json!({
                "memory": stats,
                "actions": action_count,
                "providers": providers,
            }))?;
        }
    }
    Ok(())
}

pub async fn handle_memory_search(
    query: String,
    tier: Option<String>,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let scope: SearchScope = tier
        .as_deref()
        .unwrap_or("all")
        .parse()
        .map_err(anyhow::Error::msg)?;

    let daemon = Daemon::build(config.clone()).await?;
    let hits = daemon.memory().search(&query, scope, limit).await;
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;
    let hits = hits?;

    match format {
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No memories found");
            }
            for hit in &hits {
                println!("[{}] {} (distance {:.3})", hit.tier, hit.id, hit.distance);
                println!("  {}", hit.content.replace('\n', "\n  "));
            }
        }
        OutputFormat::Json => print_json(&json!({ "query": query, "results": hits }))?,
    }
    Ok(())
}

pub async fn handle_memory_context(
    goal: String,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let daemon = Daemon::build(config.clone()).await?;
    let context = daemon.memory().relevant_context(&goal, limit).await;
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;
    let context = context?;

    match format {
        OutputFormat::Text => {
            if context.is_empty() {
                println!("Nothing relevant in memory");
            }
            for entry in &context {
                println!("{:.3} {} {}", entry.relevance, entry.kind.as_str(), entry.id);
                println!("  {}", entry.content.replace('\n', "\n  "));
            }
        }
        OutputFormat::Json => print_json(&json!({ "goal": goal, "context": context }))?,
    }
    Ok(())
}

/// Recent episodes, newest first
pub async fn handle_history(limit: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = Daemon::build(config.clone()).await?;
    let episodes = daemon.memory().recent_episodes(limit).await;
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;
    let episodes = episodes.context("Failed to fetch task history")?;

    match format {
        OutputFormat::Text => {
            if episodes.is_empty() {
                println!("No tasks in history");
                return Ok(());
            }

            println!("Task History (last {} tasks):", limit);
            println!();
            for episode in &episodes {
                println!("Task ID: {}", episode.id);
                println!("  Goal: {}", episode.goal);
                println!(
                    "  Status: {}",
                    if episode.success { "completed" } else { "failed" }
                );
                println!("  Steps: {}", episode.actions.len());
                println!("  Duration: {:.2}s", episode.duration_seconds);
                println!(
                    "  Finished: {}",
                    episode.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
                println!();
            }
        }
        OutputFormat::Json => print_json(&json!({
            "episodes": episodes,
            "count": episodes.len(),
            "limit": limit,
        }))?,
    }
    Ok(())
}

/// Every recorded step of one episode
pub async fn handle_replay(task_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = Daemon::build(config.clone()).await?;
    let episode = daemon.memory().episode(&task_id).await;
    daemon.shutdown(SHUTDOWN_TIMEOUT).await?;
    let episode = episode?.with_context(|| format!("No episode with id {}", task_id))?;

    match format {
        OutputFormat::Text => {
            println!("Task {}: {}", episode.id, episode.goal);
            for entry in &episode.actions {
                println!(
                    "  Step {} [{}] {} {}",
                    entry.step_index,
                    entry.timestamp.format("%H:%M:%S"),
                    entry.step.action,
                    if entry.result.success { "ok" } else { "FAILED" }
                );
                if let Some(replaced) = &entry.replaces {
                    println!("    recovery for {}", replaced);
                }
                if let Some(error) = &entry.result.error {
                    println!("    error: {}", error);
                }
            }
            println!("  Result: {}", episode.result);
        }
        OutputFormat::Json => print_json(&episode)?,
    }
    Ok(())
}

pub fn handle_actions(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = ActionRegistry::with_builtins(config)?;
    let specs = registry.list_actions();

    match format {
        OutputFormat::Text => {
            for spec in &specs {
                println!("{:<18} {}", spec.name, spec.description);
                if !spec.parameters.is_empty() {
                    println!("{:<18} params: {}", "", spec.parameters.join(", "));
                }
            }
        }
        OutputFormat::Json => print_json(&specs)?,
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => print_json(config)?,
    }
    Ok(())
}

pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => print_json(&json!({ "path": path }))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        assert!(parse_context(None).unwrap().is_none());

        let map = parse_context(Some(r#"{"depth": 2}"#)).unwrap().unwrap();
        assert_eq!(map["depth"], json!(2));

        assert!(parse_context(Some("[1, 2]")).is_err());
        assert!(parse_context(Some("{oops")).is_err());
    }
}
