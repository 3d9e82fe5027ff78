//! Memory metadata persistence
//!
//! Every vector held by the in-memory index has a row here. The row carries
//! the embedding itself so the index can be rebuilt when the process starts.
//! Timestamps are unix microseconds.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::memory::types::MemoryTier;

/// Stored form of a memory item
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub tier: MemoryTier,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub importance: Option<f64>,
    pub timestamp_micros: i64,
}

impl MemoryRecord {
    fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Memory repository for database operations
pub struct MemoryRepository {
    pool: SqlitePool,
}

impl MemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Start a transaction for a multi-statement write
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin memory transaction")
    }

    pub(crate) async fn insert_in(conn: &mut SqliteConnection, record: &MemoryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO memories \
             (id, tier, content, embedding, metadata, tags, importance, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.tier.as_str())
        .bind(&record.content)
        .bind(serde_json::to_string(&record.embedding)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(serde_json::to_string(&record.tags())?)
        .bind(record.importance)
        .bind(record.timestamp_micros)
        .execute(conn)
        .await
        .context("Failed to insert memory")?;

        Ok(())
    }

    /// Insert or replace a record, keeping its access history
    pub(crate) async fn upsert_in(conn: &mut SqliteConnection, record: &MemoryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO memories \
             (id, tier, content, embedding, metadata, tags, importance, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             tier = excluded.tier, content = excluded.content, embedding = excluded.embedding, \
             metadata = excluded.metadata, tags = excluded.tags, \
             importance = excluded.importance, timestamp = excluded.timestamp",
        )
        .bind(&record.id)
        .bind(record.tier.as_str())
        .bind(&record.content)
        .bind(serde_json::to_string(&record.embedding)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(serde_json::to_string(&record.tags())?)
        .bind(record.importance)
        .bind(record.timestamp_micros)
        .execute(conn)
        .await
        .context("Failed to upsert memory")?;

        Ok(())
    }

    /// Ids of the `count` oldest items in `tier`, oldest first
    ///
    /// Ties on timestamp are broken by id so the order is deterministic.
    pub(crate) async fn oldest_in(
        conn: &mut SqliteConnection,
        tier: MemoryTier,
        count: i64,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM memories WHERE tier = ? ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(tier.as_str())
        .bind(count)
        .fetch_all(conn)
        .await
        .context("Failed to select oldest memories")?;

        Ok(ids)
    }

    pub(crate) async fn count_in(conn: &mut SqliteConnection, tier: MemoryTier) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE tier = ?")
            .bind(tier.as_str())
            .fetch_one(conn)
            .await
            .context("Failed to count memories")
    }

    pub(crate) async fn delete_in(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            deleted += sqlx::query("DELETE FROM memories WHERE id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await
                .context("Failed to delete memory")?
                .rows_affected();
        }
        Ok(deleted)
    }

    pub async fn count_tier(&self, tier: MemoryTier) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::count_in(&mut conn, tier).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query(
            "SELECT id, tier, content, embedding, metadata, importance, timestamp \
             FROM memories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch memory")?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All records in insertion order, used to rebuild the vector index
    pub async fn all(&self) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT id, tier, content, embedding, metadata, importance, timestamp \
             FROM memories ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load memories")?;

        rows.iter().map(record_from_row).collect()
    }

    /// Ids in `tier` older than `cutoff_micros`
    pub async fn older_than(&self, tier: MemoryTier, cutoff_micros: i64) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM memories WHERE tier = ? AND timestamp < ?")
            .bind(tier.as_str())
            .bind(cutoff_micros)
            .fetch_all(&self.pool)
            .await
            .context("Failed to select expired memories")
    }

    pub async fn latest_timestamp(&self) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT MAX(timestamp) FROM memories")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read latest memory timestamp")
    }

    pub async fn update_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        sqlx::query("UPDATE memories SET embedding = ? WHERE id = ?")
            .bind(serde_json::to_string(embedding)?)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update memory embedding")?;
        Ok(())
    }

    /// Bump access counters for items returned by a search
    pub async fn touch(&self, ids: &[String], now_micros: i64) -> Result<()> {
        let mut tx = self.begin().await?;
        for id in ids {
            sqlx::query(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ? WHERE id = ?",
            )
            .bind(now_micros)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to record memory access")?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn access_count(&self, id: &str) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT access_count FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read access count")
    }
}

fn record_from_row(r: &SqliteRow) -> Result<MemoryRecord> {
    let tier: String = r.try_get("tier")?;
    let embedding: String = r.try_get("embedding")?;
    let metadata: String = r.try_get("metadata")?;

    Ok(MemoryRecord {
        id: r.try_get("id")?,
        tier: tier.parse().map_err(anyhow::Error::msg)?,
        content: r.try_get("content")?,
        embedding: serde_json::from_str(&embedding).context("Corrupt memory embedding")?,
        metadata: serde_json::from_str(&metadata).context("Corrupt memory metadata")?,
        importance: r.try_get("importance")?,
        timestamp_micros: r.try_get("timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, tier: MemoryTier, ts: i64) -> MemoryRecord {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tags".into(), json!(["alpha", "beta"]));
        MemoryRecord {
            id: id.to_string(),
            tier,
            content: format!("content {}", id),
            embedding: vec![0.5, -0.5],
            metadata,
            importance: None,
            timestamp_micros: ts,
        }
    }

    #[tokio::test]
    async fn test_insert_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let repo = db.memories();

        let mut tx = repo.begin().await.unwrap();
        MemoryRepository::insert_in(&mut tx, &record("a", MemoryTier::LongTerm, 10))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let loaded = repo.get("a").await.unwrap().unwrap();
        assert_eq!(loaded, record("a", MemoryTier::LongTerm, 10));

        let tags: String = sqlx::query_scalar("SELECT tags FROM memories WHERE id = 'a'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(tags, r#"["alpha","beta"]"#);
    }

    #[tokio::test]
    async fn test_oldest_orders_by_timestamp_then_id() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let repo = db.memories();

        let mut tx = repo.begin().await.unwrap();
        for (id, ts) in [("c", 5), ("b", 5), ("a", 9), ("d", 1)] {
            MemoryRepository::insert_in(&mut tx, &record(id, MemoryTier::ShortTerm, ts))
                .await
                .unwrap();
        }
        let oldest = MemoryRepository::oldest_in(&mut tx, MemoryTier::ShortTerm, 3)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(oldest, vec!["d", "b", "c"]);
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let repo = db.memories();

        {
            let mut tx = repo.begin().await.unwrap();
            MemoryRepository::insert_in(&mut tx, &record("a", MemoryTier::ShortTerm, 1))
                .await
                .unwrap();
            // dropped without commit
        }

        assert_eq!(repo.count_tier(MemoryTier::ShortTerm).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_content_and_keeps_access_history() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let repo = db.memories();

        let mut tx = repo.begin().await.unwrap();
        MemoryRepository::upsert_in(&mut tx, &record("a", MemoryTier::Episodic, 1))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        repo.touch(&["a".to_string()], 100).await.unwrap();

        let mut replacement = record("a", MemoryTier::Episodic, 7);
        replacement.content = "retried".to_string();
        let mut tx = repo.begin().await.unwrap();
        MemoryRepository::upsert_in(&mut tx, &replacement)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let loaded = repo.get("a").await.unwrap().unwrap();
        assert_eq!(loaded, replacement);
        assert_eq!(repo.count_tier(MemoryTier::Episodic).await.unwrap(), 1);
        assert_eq!(repo.access_count("a").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_touch_increments_access_count() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let repo = db.memories();

        let mut tx = repo.begin().await.unwrap();
        MemoryRepository::insert_in(&mut tx, &record("a", MemoryTier::Episodic, 1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        repo.touch(&["a".to_string()], 100).await.unwrap();
        repo.touch(&["a".to_string()], 200).await.unwrap();

        assert_eq!(repo.access_count("a").await.unwrap(), Some(2));
    }
}
