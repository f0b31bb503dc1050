use crate::db::models::cv_models::FrameObservation;
use crate::error::Error;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

/// Room observation repository (cv_events). Dedup and the monotonic
/// entry counter both ride on the (room_id, timestamp) uniqueness
/// constraint and the window queries here.
#[derive(Clone)]
pub struct CvEventsRepository {
    pool: Arc<PgPool>,
}

impl CvEventsRepository {
    /// Create a new cv_events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Highest entry counter observed for a room since the window start.
    /// Seeds the running counter so a new batch never resets to zero
    /// mid-window.
    pub async fn max_entry_count_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i32> {
        let result: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(entry_count)
            FROM cv_events
            WHERE room_id = $1 AND timestamp >= $2
            "#,
        )
        .bind(room_id)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read entry counter baseline: {}", e)))?;

        Ok(result.unwrap_or(0))
    }

    /// Observation timestamps already stored for a room since the window
    /// start, used to skip idempotent replays.
    pub async fn existing_timestamps_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let result = sqlx::query_scalar(
            r#"
            SELECT timestamp
            FROM cv_events
            WHERE room_id = $1 AND timestamp >= $2
            "#,
        )
        .bind(room_id)
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read existing observations: {}", e)))?;

        Ok(result)
    }

    /// Insert an observation. Returns false when the (room, timestamp)
    /// key already exists; the caller logs and moves on.
    pub async fn insert(&self, observation: &FrameObservation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cv_events (id, room_id, person_count, entry_count, timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (room_id, timestamp) DO NOTHING
            "#,
        )
        .bind(observation.id)
        .bind(&observation.room_id)
        .bind(observation.person_count)
        .bind(observation.entry_count)
        .bind(observation.timestamp)
        .bind(observation.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert observation: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    async fn test_pool() -> Option<Arc<PgPool>> {
        // Skip unless a test database is available.
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .ok()?;
        crate::db::migrations::run_migrations(&pool).await.ok()?;
        Some(Arc::new(pool))
    }

    #[tokio::test]
    async fn room_timestamp_key_is_idempotent() -> Result<()> {
        let Some(pool) = test_pool().await else {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return Ok(());
        };

        let repo = CvEventsRepository::new(pool);
        let room_id = format!("room-{}", Uuid::new_v4());
        let timestamp = Utc::now();

        let observation = FrameObservation {
            id: Uuid::new_v4(),
            room_id: room_id.clone(),
            person_count: 1,
            entry_count: 1,
            timestamp,
            created_at: Utc::now(),
        };
        assert!(repo.insert(&observation).await?);

        // Replay with a fresh row id: the key conflict is a no-op.
        let replay = FrameObservation {
            id: Uuid::new_v4(),
            ..observation
        };
        assert!(!repo.insert(&replay).await?);

        let window_start = Utc::now() - Duration::minutes(60);
        assert_eq!(repo.max_entry_count_since(&room_id, window_start).await?, 1);
        assert_eq!(
            repo.existing_timestamps_since(&room_id, window_start).await?.len(),
            1
        );

        Ok(())
    }
}
