//! Agent lifecycle
//!
//! [`Daemon`] is the composition root: it opens the database, builds the
//! memory store, generation gateway, action registry, decision strategy and
//! orchestrator from a [`Config`], and owns the dispatch loop.
//!
//! # Graceful shutdown
//!
//! 1. Stop accepting submissions
//! 2. Wait (bounded) for the in-flight task to reach a terminal state
//! 3. Checkpoint the SQLite WAL and close the pool

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actions::{ActionExecutor, ActionRegistry};
use crate::config::Config;
use crate::db::Database;
use crate::events::{Event, EventBus, EventType};
use crate::llm::{Generator, LLMGateway};
use crate::memory::{Embedder, HashingEmbedder, InMemoryIndex, MemoryStore, OllamaEmbedder};
use crate::orchestrator::{Orchestrator, Task};
use crate::strategy::DecisionStrategy;

/// How long shutdown waits for the in-flight task
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Daemon {
    config: Config,
    database: Database,
    memory: Arc<MemoryStore>,
    generator: Arc<dyn Generator>,
    registry: Arc<ActionRegistry>,
    orchestrator: Arc<Orchestrator>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// Embedder named by `memory.embedding`
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let memory = &config.memory;
    match memory.embedding.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(memory.embedding_dim))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            config.llm.ollama.base_url.clone(),
            memory.embedding_model.clone(),
            memory.embedding_dim,
        ))),
        other => Err(anyhow::anyhow!("Unknown embedding backend '{}'", other)),
    }
}

impl Daemon {
    /// Wire every component from `config`
    pub async fn build(config: Config) -> Result<Self> {
        let gateway = LLMGateway::from_config(&config.llm).context("Failed to set up LLM gateway")?;
        Self::with_generator(config, Arc::new(gateway)).await
    }

    /// Like [`Daemon::build`] with a caller-supplied generator
    pub async fn with_generator(config: Config, generator: Arc<dyn Generator>) -> Result<Self> {
        let database = Database::new(&config.database_path())
            .await
            .context("Failed to open database")?;

        let memory = Arc::new(
            MemoryStore::open(
                &database,
                build_embedder(&config)?,
                Box::new(InMemoryIndex::new()),
                config.memory.clone(),
            )
            .await
            .context("Failed to open memory store")?,
        );

        let registry = Arc::new(
            ActionRegistry::with_builtins(&config).context("Failed to register actions")?,
        );
        registry
            .validate_priors(&config.strategy)
            .context("Invalid strategy configuration")?;

        let strategy = Arc::new(DecisionStrategy::new(
            Arc::clone(&generator),
            Arc::clone(&memory),
            config.strategy.clone(),
            config.orchestrator.context_limit,
        ));

        let executor = Arc::clone(&registry) as Arc<dyn ActionExecutor>;
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&generator),
            executor,
            Arc::clone(&memory),
            strategy,
            Arc::new(EventBus::new()),
            config.orchestrator.clone(),
        ));

        Ok(Self {
            config,
            database,
            memory,
            generator,
            registry,
            orchestrator,
            dispatch: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.orchestrator.events()
    }

    /// Purge expired memories and start the dispatch loop
    pub async fn start(&self) -> Result<()> {
        match self.memory.purge_expired().await {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired short-term memories", n),
            Err(e) => warn!("Memory retention sweep failed: {}", e),
        }

        let handle = self.orchestrator.start().await?;
        *self.dispatch.lock().await = Some(handle);
        info!("Praxis started");
        Ok(())
    }

    /// Submit `goal` and wait for its terminal event
    pub async fn run_goal(&self, goal: &str, context: Option<Map<String, Value>>) -> Result<Task> {
        let mut completed = self.events().subscribe(EventType::TaskCompleted).await;
        let mut failed = self.events().subscribe(EventType::TaskFailed).await;

        let submitted = self.orchestrator.submit(goal, context).await?;

        loop {
            let event = tokio::select! {
                event = completed.recv() => event,
                event = failed.recv() => event,
            };
            match event {
                Some(Event::TaskCompleted(task)) | Some(Event::TaskFailed(task))
                    if task.id == submitted.id =>
                {
                    return Ok(*task);
                }
                Some(_) => continue,
                None => anyhow::bail!("Event bus closed before task {} finished", submitted.id),
            }
        }
    }

    /// Stop dispatching, wait for the in-flight task and flush storage
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down");
        self.orchestrator.stop();

        if let Some(handle) = self.dispatch.lock().await.take() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Dispatch loop ended abnormally: {}", e),
                Err(_) => warn!("In-flight task did not finish within {:?}", timeout),
            }
        }

        self.database
            .flush_wal()
            .await
            .context("Failed to flush WAL")?;
        self.database.close().await?;
        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Offline;

    #[async_trait]
    impl Generator for Offline {
        async fn generate(&self, _request: GenerationRequest) -> GenerationResponse {
            GenerationResponse::failed("offline")
        }
    }

    fn test_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.data_dir = temp.path().join("data");
        config.core.workspace = temp.path().join("workspace");
        config
    }

    #[test]
    fn test_unknown_embedder_rejected() {
        let mut config = Config::default();
        config.memory.embedding = "word2vec".to_string();
        assert!(build_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn test_run_goal_with_offline_model() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::with_generator(test_config(&temp), Arc::new(Offline))
            .await
            .unwrap();
        daemon.start().await.unwrap();

        let task = daemon.run_goal("check the machine", None).await.unwrap();
        assert!(task.is_terminal());
        assert_eq!(task.plan[0].action, "get_system_info");

        let stats = daemon.memory().stats().await.unwrap();
        assert_eq!(stats.total_episodes, 1);

        daemon.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(daemon
            .orchestrator()
            .submit("too late", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_invalid_priors_fail_build() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config
            .strategy
            .action_priors
            .insert("teleport".to_string(), 0.5);

        let err = Daemon::with_generator(config, Arc::new(Offline))
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("teleport"));
    }
}
