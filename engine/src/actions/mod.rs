//! Action registry
//!
//! Holds every [`Action`] the planner may reference, keyed by name, and
//! runs them under a timeout. The orchestrator only sees the
//! [`ActionExecutor`] trait, so tests can substitute scripted executors.

use async_trait::async_trait;
use sdk::{Action, ActionParams, ActionResult, ActionSpec, EngineError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, StrategyConfig};

pub mod command;
pub mod filesystem;
pub mod guard;
pub mod system;
pub mod web;

pub use guard::PathGuard;

/// Execution capability consumed by the orchestrator
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run `name`; unknown actions and errors come back as failed results
    async fn execute(&self, name: &str, params: &ActionParams) -> ActionResult;

    /// Registered actions in registration order
    fn list_actions(&self) -> Vec<ActionSpec>;

    fn has_action(&self, name: &str) -> bool {
        self.list_actions().iter().any(|spec| spec.name == name)
    }
}

pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.actions.iter().map(|a| a.name()).collect();
        f.debug_struct("ActionRegistry")
            .field("actions", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ActionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            actions: Vec::new(),
            index: HashMap::new(),
            timeout,
        }
    }

    /// Add an action; names must be unique
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), EngineError> {
        let name = action.name().to_string();
        if self.index.contains_key(&name) {
            return Err(EngineError::DuplicateAction(name));
        }

        debug!("Registered action '{}'", name);
        self.index.insert(name, self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    pub fn from_actions(
        actions: Vec<Arc<dyn Action>>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut registry = Self::new(timeout);
        for action in actions {
            registry.register(action)?;
        }
        Ok(registry)
    }

    /// Registry with every built-in action, honouring `[security]`
    pub fn with_builtins(config: &Config) -> Result<Self, EngineError> {
        let security = &config.security;
        let workspace = &config.core.workspace;
        let guard = Arc::new(PathGuard::new(workspace, &security.restricted_paths)?);
        let files = security.allow_file_operations;
        let network = security.allow_network_access;
        let code = security.allow_code_execution;

        let actions: Vec<Arc<dyn Action>> = vec![
            Arc::new(filesystem::ReadFile::new(Arc::clone(&guard), files)),
            Arc::new(filesystem::WriteFile::new(Arc::clone(&guard), files)),
            Arc::new(filesystem::ListDirectory::new(Arc::clone(&guard), files)),
            Arc::new(filesystem::CopyFile::new(Arc::clone(&guard), files)),
            Arc::new(filesystem::DeleteFile::new(Arc::clone(&guard), files)),
            Arc::new(web::FetchUrl::new(network)),
            Arc::new(web::SearchWeb::new(network)),
            Arc::new(web::ExtractTextFromHtml),
            Arc::new(system::SystemInfo::new(guard.workspace().to_path_buf())),
            Arc::new(system::RunningProcesses),
            Arc::new(command::ExecuteCommand::new(
                guard.workspace().to_path_buf(),
                code,
            )),
            Arc::new(command::ExecutePython::new(
                guard.workspace().to_path_buf(),
                code,
            )),
        ];

        let registry = Self::from_actions(
            actions,
            Duration::from_secs(config.orchestrator.action_timeout_secs),
        )?;
        info!(
            "Action registry ready: {} actions (files={}, network={}, code={})",
            registry.len(),
            files,
            network,
            code
        );
        Ok(registry)
    }

    /// Reject configured priors for actions that are not registered
    pub fn validate_priors(&self, strategy: &StrategyConfig) -> Result<(), EngineError> {
        let unknown: Vec<&str> = strategy
            .action_priors
            .keys()
            .map(String::as_str)
            .filter(|name| !self.index.contains_key(*name))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(format!(
                "strategy.action_priors names unknown actions: {}",
                unknown.join(", ")
            )))
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.index.get(name).map(|&i| &self.actions[i])
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[async_trait]
impl ActionExecutor for ActionRegistry {
    async fn execute(&self, name: &str, params: &ActionParams) -> ActionResult {
        let start = Instant::now();
        let Some(action) = self.get(name) else {
            warn!("Unknown action requested: {}", name);
            return ActionResult::failed(EngineError::ActionNotFound(name.to_string()).to_string());
        };

        let outcome = match tokio::time::timeout(self.timeout, action.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ActionTimeout(self.timeout.as_secs())),
        };
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(value) => {
                debug!("Action '{}' succeeded in {:.3}s", name, elapsed);
                ActionResult::ok(value).with_execution_time(elapsed)
            }
            Err(e) => {
                warn!("Action '{}' failed: {}", name, e);
                ActionResult::failed(e.to_string()).with_execution_time(elapsed)
            }
        }
    }

    fn list_actions(&self) -> Vec<ActionSpec> {
        self.actions.iter().map(|a| a.spec()).collect()
    }

    fn has_action(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}
