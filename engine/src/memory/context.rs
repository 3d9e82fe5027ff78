//! Working context for the task currently being executed
//!
//! Never persisted. Cleared when a task is finalized.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::ContextEntry;

#[derive(Debug, Default)]
pub struct WorkingContext {
    entries: RwLock<HashMap<String, ContextEntry>>,
}

impl WorkingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().await.insert(
            key.into(),
            ContextEntry {
                value,
                timestamp: Utc::now(),
            },
        );
    }

    pub async fn get(&self, key: &str) -> Option<ContextEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Copy of every entry
    pub async fn snapshot(&self) -> HashMap<String, ContextEntry> {
        self.entries.read().await.clone()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
