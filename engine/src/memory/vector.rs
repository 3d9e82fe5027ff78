//! Per-tier nearest-neighbour index
//!
//! The index lives in memory and is rebuilt from SQLite on startup. Search
//! is exhaustive, which is fine at the sizes the tiers are capped to.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::types::MemoryTier;

/// Vector plus the document and metadata it was built from
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
}

/// A query result
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
}

pub trait VectorIndex: Send + Sync {
    /// Insert or replace `record` in `tier`
    fn insert(&mut self, tier: MemoryTier, record: VectorRecord);

    /// Remove by id, returning whether it was present
    fn remove(&mut self, tier: MemoryTier, id: &str) -> bool;

    /// Up to `k` nearest records by ascending distance
    fn query(&self, tier: MemoryTier, embedding: &[f32], k: usize) -> Vec<VectorMatch>;

    fn len(&self, tier: MemoryTier) -> usize;

    fn contains(&self, tier: MemoryTier, id: &str) -> bool;
}

/// Cosine distance in [0, 2]; 1.0 when either vector is zero or widths differ
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - similarity
}

/// Brute-force in-memory index
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    tiers: HashMap<MemoryTier, BTreeMap<String, VectorRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for InMemoryIndex {
    fn insert(&mut self, tier: MemoryTier, record: VectorRecord) {
        self.tiers
            .entry(tier)
            .or_default()
            .insert(record.id.clone(), record);
    }

    fn remove(&mut self, tier: MemoryTier, id: &str) -> bool {
        self.tiers
            .get_mut(&tier)
            .map(|records| records.remove(id).is_some())
            .unwrap_or(false)
    }

    fn query(&self, tier: MemoryTier, embedding: &[f32], k: usize) -> Vec<VectorMatch> {
        let Some(records) = self.tiers.get(&tier) else {
            return Vec::new();
        };

        let mut matches: Vec<VectorMatch> = records
            .values()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(embedding, &r.embedding),
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(k);
        matches
    }

    fn len(&self, tier: MemoryTier) -> usize {
        self.tiers.get(&tier).map(BTreeMap::len).unwrap_or(0)
    }

    fn contains(&self, tier: MemoryTier, id: &str) -> bool {
        self.tiers
            .get(&tier)
            .map(|records| records.contains_key(id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            document: format!("doc {}", id),
            metadata: Map::new(),
            embedding,
        }
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert!((cosine_distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_query_orders_by_distance() {
        let mut index = InMemoryIndex::new();
        index.insert(MemoryTier::LongTerm, record("far", vec![0.0, 1.0]));
        index.insert(MemoryTier::LongTerm, record("near", vec![1.0, 0.1]));
        index.insert(MemoryTier::LongTerm, record("exact", vec![1.0, 0.0]));

        let ids: Vec<String> = index
            .query(MemoryTier::LongTerm, &[1.0, 0.0], 2)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["exact", "near"]);
    }

    #[test]
    fn test_tiers_are_isolated() {
        let mut index = InMemoryIndex::new();
        index.insert(MemoryTier::ShortTerm, record("a", vec![1.0]));

        assert_eq!(index.len(MemoryTier::ShortTerm), 1);
        assert_eq!(index.len(MemoryTier::Episodic), 0);
        assert!(index.query(MemoryTier::Episodic, &[1.0], 5).is_empty());
        assert!(!index.remove(MemoryTier::LongTerm, "a"));
        assert!(index.remove(MemoryTier::ShortTerm, "a"));
        assert!(!index.contains(MemoryTier::ShortTerm, "a"));
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut index = InMemoryIndex::new();
        index.insert(MemoryTier::Episodic, record("a", vec![1.0, 0.0]));
        index.insert(MemoryTier::Episodic, record("a", vec![0.0, 1.0]));

        assert_eq!(index.len(MemoryTier::Episodic), 1);
        let hit = &index.query(MemoryTier::Episodic, &[0.0, 1.0], 1)[0];
        assert!(hit.distance.abs() < 1e-6);
    }
}
