//! Tiered memory store
//!
//! Memories live in three tiers:
//!
//! - **short_term**: per-step observations, capped by
//!   `memory.max_short_term_memories` with oldest-first eviction
//! - **long_term**: distilled learnings weighted by an importance score
//! - **episodic**: one condensed summary per finished task
//!
//! Each item is a vector in the in-memory [`VectorIndex`] plus a metadata
//! row in SQLite. Writes take the index write lock, commit the SQLite
//! transaction and only then touch the index, so a failed commit leaves
//! neither half behind. On [`MemoryStore::open`] the index is rebuilt from
//! the rows, which also repairs anything a crash interrupted.

pub mod context;
pub mod embedder;
pub mod types;
pub mod vector;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sdk::errors::EngineError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::db::{Database, EpisodeRepository, MemoryRecord, MemoryRepository};

pub use context::WorkingContext;
pub use embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use types::{
    ContextEntry, ContextKind, Memory, MemoryStats, MemoryTier, RelevantContext, SearchHit,
    SearchScope, TaskEpisode,
};
pub use vector::{InMemoryIndex, VectorIndex, VectorRecord};

fn db_err(e: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", e))
}

/// Hands out strictly increasing microsecond timestamps
#[derive(Debug, Default)]
struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    fn next(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

pub struct MemoryStore {
    memories: MemoryRepository,
    episodes: EpisodeRepository,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Box<dyn VectorIndex>>,
    context: WorkingContext,
    clock: MonotonicClock,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Open the store over `db`, loading every persisted vector into `index`
    pub async fn open(
        db: &Database,
        embedder: Arc<dyn Embedder>,
        mut index: Box<dyn VectorIndex>,
        config: MemoryConfig,
    ) -> Result<Self, EngineError> {
        let memories = db.memories();
        let records = memories.all().await.map_err(db_err)?;
        let dim = embedder.dimension();
        let mut reembedded = 0usize;

        for mut record in records.into_iter() {
            if record.embedding.len() != dim {
                record.embedding = embedder.embed(&record.content).await?;
                memories
                    .update_embedding(&record.id, &record.embedding)
                    .await
                    .map_err(db_err)?;
                reembedded += 1;
            }
            index.insert(record.tier, vector_record(record));
        }

        if reembedded > 0 {
            warn!(
                count = reembedded,
                "Re-embedded memories after embedding width change"
            );
        }

        let last = memories.latest_timestamp().await.map_err(db_err)?;

        let store = Self {
            memories,
            episodes: db.episodes(),
            embedder,
            index: RwLock::new(index),
            context: WorkingContext::new(),
            clock: MonotonicClock::starting_after(last.unwrap_or(0)),
            config,
        };

        {
            let index = store.index.read().await;
            info!(
                short_term = index.len(MemoryTier::ShortTerm),
                long_term = index.len(MemoryTier::LongTerm),
                episodic = index.len(MemoryTier::Episodic),
                "Memory store opened"
            );
        }

        Ok(store)
    }

    /// Store a short-term memory and evict the oldest items past the ceiling
    pub async fn add_short_term(
        &self,
        content: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, EngineError> {
        self.write(MemoryTier::ShortTerm, content, metadata.unwrap_or_default(), None, None)
            .await
    }

    /// Store a long-term memory; `importance` weights it at retrieval time
    pub async fn add_long_term(
        &self,
        content: &str,
        importance: f64,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, EngineError> {
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("importance_score".to_string(), json!(importance));
        self.write(
            MemoryTier::LongTerm,
            content,
            metadata,
            Some(importance),
            None,
        )
        .await
    }

    /// Persist an episode and embed its summary into the episodic tier
    pub async fn store_episode(&self, episode: &TaskEpisode) -> Result<String, EngineError> {
        let mut metadata = Map::new();
        metadata.insert("episode_id".to_string(), json!(episode.id));
        metadata.insert("success".to_string(), json!(episode.success));
        metadata.insert("duration".to_string(), json!(episode.duration_seconds));
        metadata.insert(
            "timestamp".to_string(),
            json!(episode.timestamp.to_rfc3339()),
        );

        self.write(
            MemoryTier::Episodic,
            &episode.summary(),
            metadata,
            None,
            Some(episode),
        )
        .await
    }

    async fn write(
        &self,
        tier: MemoryTier,
        content: &str,
        mut metadata: Map<String, Value>,
        importance: Option<f64>,
        episode: Option<&TaskEpisode>,
    ) -> Result<String, EngineError> {
        let embedding = self.embedder.embed(content).await?;

        let mut index = self.index.write().await;

        let timestamp = self.clock.next();
        let id = match episode {
            Some(ep) => ep.id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        metadata
            .entry("timestamp")
            .or_insert_with(|| json!(micros_to_datetime(timestamp).to_rfc3339()));

        let record = MemoryRecord {
            id: id.clone(),
            tier,
            content: content.to_string(),
            embedding,
            metadata,
            importance,
            timestamp_micros: timestamp,
        };

        let mut tx = self.memories.begin().await.map_err(db_err)?;
        match episode {
            // episodes are keyed by task id, so storing one again replaces it
            Some(ep) => {
                EpisodeRepository::upsert_in(&mut tx, ep)
                    .await
                    .map_err(db_err)?;
                MemoryRepository::upsert_in(&mut tx, &record)
                    .await
                    .map_err(db_err)?;
            }
            None => MemoryRepository::insert_in(&mut tx, &record)
                .await
                .map_err(db_err)?,
        }

        let mut evicted = Vec::new();
        if tier == MemoryTier::ShortTerm {
            let count = MemoryRepository::count_in(&mut tx, tier)
                .await
                .map_err(db_err)?;
            let ceiling = self.config.max_short_term_memories as i64;
            if count > ceiling {
                evicted = MemoryRepository::oldest_in(&mut tx, tier, count - ceiling)
                    .await
                    .map_err(db_err)?;
                MemoryRepository::delete_in(&mut tx, &evicted)
                    .await
                    .map_err(db_err)?;
            }
        }
        tx.commit()
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        index.insert(tier, vector_record(record));
        for old in &evicted {
            index.remove(tier, old);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted short-term memories");
        }
        debug!(%id, %tier, "Memory stored");

        Ok(id)
    }

    /// Nearest memories to `query`, closest first
    pub async fn search(
        &self,
        query: &str,
        scope: SearchScope,
        limit: usize,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;

        let mut hits: Vec<SearchHit> = {
            let index = self.index.read().await;
            scope
                .tiers()
                .into_iter()
                .flat_map(|tier| {
                    index
                        .query(tier, &embedding, limit)
                        .into_iter()
                        .map(move |m| SearchHit {
                            id: m.id,
                            content: m.document,
                            tier,
                            metadata: m.metadata,
                            distance: m.distance,
                        })
                })
                .collect()
        };

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        if let Err(e) = self.memories.touch(&ids, Utc::now().timestamp_micros()).await {
            warn!("Failed to record memory access: {:#}", e);
        }

        Ok(hits)
    }

    /// Successful episodes and long-term learnings ranked by relevance
    ///
    /// Episodes score `1 - distance`; long-term memories score
    /// `(1 - distance) * importance`. Unsuccessful episodes are dropped.
    pub async fn relevant_context(
        &self,
        goal: &str,
        limit: usize,
    ) -> Result<Vec<RelevantContext>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // over-fetch episodes since failed ones are filtered out
        let episodes = self
            .search(goal, SearchScope::Tier(MemoryTier::Episodic), limit.saturating_mul(2))
            .await?;
        let learnings = self
            .search(goal, SearchScope::Tier(MemoryTier::LongTerm), limit)
            .await?;

        let mut context: Vec<RelevantContext> = episodes
            .into_iter()
            .filter(|hit| {
                hit.metadata
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .map(|hit| RelevantContext {
                id: hit.id,
                kind: ContextKind::SuccessfulEpisode,
                content: hit.content,
                relevance: 1.0 - f64::from(hit.distance),
            })
            .chain(learnings.into_iter().map(|hit| RelevantContext {
                relevance: (1.0 - f64::from(hit.distance)) * types::importance_of(&hit.metadata),
                id: hit.id,
                kind: ContextKind::LongTermMemory,
                content: hit.content,
            }))
            .collect();

        context.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        context.truncate(limit);
        Ok(context)
    }

    pub async fn set_context(&self, key: impl Into<String>, value: Value) {
        self.context.set(key, value).await;
    }

    pub async fn get_context(&self) -> HashMap<String, ContextEntry> {
        self.context.snapshot().await
    }

    pub async fn context_value(&self, key: &str) -> Option<Value> {
        self.context.get(key).await.map(|entry| entry.value)
    }

    pub async fn clear_context(&self) {
        self.context.clear().await;
    }

    pub async fn stats(&self) -> Result<MemoryStats, EngineError> {
        let counts = self.episodes.counts().await.map_err(db_err)?;
        let index = self.index.read().await;

        let success_rate = if counts.total > 0 {
            counts.successful as f64 / counts.total as f64
        } else {
            0.0
        };

        Ok(MemoryStats {
            short_term: index.len(MemoryTier::ShortTerm),
            long_term: index.len(MemoryTier::LongTerm),
            episodic: index.len(MemoryTier::Episodic),
            total_episodes: counts.total,
            successful_episodes: counts.successful,
            success_rate,
        })
    }

    /// Delete short-term memories older than the retention window
    pub async fn purge_expired(&self) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        let expired = self
            .memories
            .older_than(MemoryTier::ShortTerm, cutoff.timestamp_micros())
            .await
            .map_err(db_err)?;

        if expired.is_empty() {
            return Ok(0);
        }

        let mut index = self.index.write().await;
        let mut tx = self.memories.begin().await.map_err(db_err)?;
        MemoryRepository::delete_in(&mut tx, &expired)
            .await
            .map_err(db_err)?;
        tx.commit()
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        for id in &expired {
            index.remove(MemoryTier::ShortTerm, id);
        }

        info!(count = expired.len(), "Purged expired short-term memories");
        Ok(expired.len())
    }

    pub async fn recent_episodes(&self, limit: i64) -> Result<Vec<TaskEpisode>, EngineError> {
        self.episodes.recent(limit).await.map_err(db_err)
    }

    pub async fn episode(&self, id: &str) -> Result<Option<TaskEpisode>, EngineError> {
        self.episodes.get(id).await.map_err(db_err)
    }

    /// Load a memory by id from structured storage
    pub async fn get(&self, id: &str) -> Result<Option<Memory>, EngineError> {
        let record = self.memories.get(id).await.map_err(db_err)?;
        Ok(record.map(|r| Memory {
            id: r.id,
            content: r.content,
            tier: r.tier,
            timestamp: micros_to_datetime(r.timestamp_micros),
            metadata: r.metadata,
            embedding: r.embedding,
        }))
    }

    /// Whether `id` is present in the vector index for `tier`
    pub async fn is_indexed(&self, tier: MemoryTier, id: &str) -> bool {
        self.index.read().await.contains(tier, id)
    }
}

fn vector_record(record: MemoryRecord) -> VectorRecord {
    VectorRecord {
        id: record.id,
        document: record.content,
        metadata: record.metadata,
        embedding: record.embedding,
    }
}
