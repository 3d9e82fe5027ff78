//! Memory records, episodes and query results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::orchestrator::task::{ActionLogEntry, Step};

/// One of the three memory partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
    Episodic,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 3] = [
        MemoryTier::ShortTerm,
        MemoryTier::LongTerm,
        MemoryTier::Episodic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
            MemoryTier::Episodic => "episodic",
        }
    }
}

impl FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(MemoryTier::ShortTerm),
            "long_term" => Ok(MemoryTier::LongTerm),
            "episodic" => Ok(MemoryTier::Episodic),
            other => Err(format!("unknown memory tier: {}", other)),
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tiers a search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Tier(MemoryTier),
    All,
}

impl SearchScope {
    pub fn tiers(&self) -> Vec<MemoryTier> {
        match self {
            SearchScope::Tier(tier) => vec![*tier],
            SearchScope::All => MemoryTier::ALL.to_vec(),
        }
    }
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SearchScope::All),
            tier => tier.parse().map(SearchScope::Tier),
        }
    }
}

/// A stored memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub tier: MemoryTier,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Memory {
    /// Importance weight used at retrieval time, 1.0 when unset
    pub fn importance(&self) -> f64 {
        importance_of(&self.metadata)
    }
}

pub(crate) fn importance_of(metadata: &Map<String, Value>) -> f64 {
    metadata
        .get("importance_score")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
}

/// Result of a similarity search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub tier: MemoryTier,
    pub metadata: Map<String, Value>,
    /// Cosine distance, lower is closer
    pub distance: f32,
}

/// Where a relevant-context entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    SuccessfulEpisode,
    LongTermMemory,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::SuccessfulEpisode => "successful_episode",
            ContextKind::LongTermMemory => "long_term_memory",
        }
    }
}

/// Ranked entry returned by `MemoryStore::relevant_context`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantContext {
    pub id: String,
    pub kind: ContextKind,
    pub content: String,
    pub relevance: f64,
}

/// Value held in the working context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of one finished task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEpisode {
    pub id: String,
    pub goal: String,
    pub plan: Vec<Step>,
    pub actions: Vec<ActionLogEntry>,
    pub result: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl TaskEpisode {
    /// Condensed text embedded into the episodic tier
    pub fn summary(&self) -> String {
        format!("Goal: {}\nResult: {}", self.goal, self.result)
    }
}

/// Counts per tier plus episode outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub short_term: usize,
    pub long_term: usize,
    pub episodic: usize,
    pub total_episodes: u64,
    pub successful_episodes: u64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("all".parse::<SearchScope>().unwrap(), SearchScope::All);
        assert_eq!(
            "episodic".parse::<SearchScope>().unwrap(),
            SearchScope::Tier(MemoryTier::Episodic)
        );
        assert!("working".parse::<SearchScope>().is_err());
        assert_eq!(SearchScope::All.tiers().len(), 3);
    }

    #[test]
    fn test_importance_defaults_to_one() {
        let mut metadata = Map::new();
        assert_eq!(importance_of(&metadata), 1.0);
        metadata.insert("importance_score".into(), json!(0.25));
        assert_eq!(importance_of(&metadata), 0.25);
    }
}
