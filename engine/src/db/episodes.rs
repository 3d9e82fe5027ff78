//! Task episode persistence
//!
//! Plans, action logs and metadata are stored as JSON text columns. All
//! queries are parameterized.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::memory::types::TaskEpisode;

/// Aggregate outcome counts used by memory stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeCounts {
    pub total: u64,
    pub successful: u64,
}

/// Episode repository for database operations
pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace an episode on an existing connection or transaction
    pub(crate) async fn upsert_in(conn: &mut SqliteConnection, episode: &TaskEpisode) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_episodes \
             (id, goal, plan, actions, result, success, duration_seconds, timestamp, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             goal = excluded.goal, plan = excluded.plan, actions = excluded.actions, \
             result = excluded.result, success = excluded.success, \
             duration_seconds = excluded.duration_seconds, timestamp = excluded.timestamp, \
             metadata = excluded.metadata",
        )
        .bind(&episode.id)
        .bind(&episode.goal)
        .bind(serde_json::to_string(&episode.plan)?)
        .bind(serde_json::to_string(&episode.actions)?)
        .bind(&episode.result)
        .bind(episode.success)
        .bind(episode.duration_seconds)
        .bind(episode.timestamp.timestamp_millis())
        .bind(serde_json::to_string(&episode.metadata)?)
        .execute(conn)
        .await
        .context("Failed to store task episode")?;

        Ok(())
    }

    pub async fn upsert(&self, episode: &TaskEpisode) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_in(&mut conn, episode).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<TaskEpisode>> {
        let row = sqlx::query(
            "SELECT id, goal, plan, actions, result, success, duration_seconds, timestamp, metadata \
             FROM task_episodes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task episode")?;

        row.as_ref().map(episode_from_row).transpose()
    }

    /// Most recent episodes first
    pub async fn recent(&self, limit: i64) -> Result<Vec<TaskEpisode>> {
        let rows = sqlx::query(
            "SELECT id, goal, plan, actions, result, success, duration_seconds, timestamp, metadata \
             FROM task_episodes ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent episodes")?;

        rows.iter().map(episode_from_row).collect()
    }

    pub async fn counts(&self) -> Result<EpisodeCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(success), 0) AS successful FROM task_episodes",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count task episodes")?;

        let total: i64 = row.try_get("total")?;
        let successful: i64 = row.try_get("successful")?;

        Ok(EpisodeCounts {
            total: total.max(0) as u64,
            successful: successful.max(0) as u64,
        })
    }
}

fn episode_from_row(r: &SqliteRow) -> Result<TaskEpisode> {
    let timestamp: i64 = r.try_get("timestamp")?;
    let plan: String = r.try_get("plan")?;
    let actions: String = r.try_get("actions")?;
    let metadata: String = r.try_get("metadata")?;

    Ok(TaskEpisode {
        id: r.try_get("id")?,
        goal: r.try_get("goal")?,
        plan: serde_json::from_str(&plan).context("Corrupt episode plan")?,
        actions: serde_json::from_str(&actions).context("Corrupt episode actions")?,
        result: r.try_get("result")?,
        success: r.try_get("success")?,
        duration_seconds: r.try_get("duration_seconds")?,
        timestamp: DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).context("Corrupt episode metadata")?,
    })
}
