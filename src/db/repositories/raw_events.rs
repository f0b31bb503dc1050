use crate::db::models::event_models::RawEvent;
use crate::error::Error;
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Raw events repository. Inserts are idempotent on dedupe_key: a
/// uniqueness collision means "already processed", never an error.
#[derive(Clone)]
pub struct RawEventsRepository {
    pool: Arc<PgPool>,
}

impl RawEventsRepository {
    /// Create a new raw events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert a raw event. Returns None when the dedupe key already
    /// exists, so callers can report a deduped delivery as success.
    pub async fn insert(&self, event: &RawEvent) -> Result<Option<RawEvent>> {
        let result = sqlx::query_as::<_, RawEvent>(
            r#"
            INSERT INTO raw_events (
                id, property_id, connector_id, system, vendor, occurred_at,
                vendor_event_id, dedupe_key, signature_valid, payload, processing_error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING id, property_id, connector_id, system, vendor, occurred_at,
                      vendor_event_id, dedupe_key, signature_valid, payload, processing_error, created_at
            "#,
        )
        .bind(event.id)
        .bind(event.property_id)
        .bind(event.connector_id)
        .bind(&event.system)
        .bind(&event.vendor)
        .bind(event.occurred_at)
        .bind(&event.vendor_event_id)
        .bind(&event.dedupe_key)
        .bind(event.signature_valid)
        .bind(&event.payload)
        .bind(&event.processing_error)
        .bind(event.created_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert raw event: {}", e)))?;

        Ok(result)
    }

    /// Attach a processing error to an already-committed raw event. The
    /// row itself is preserved for replay and inspection.
    pub async fn attach_processing_error(&self, id: &Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE raw_events
            SET processing_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record processing error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;

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
    async fn replayed_delivery_inserts_once() -> Result<()> {
        let Some(pool) = test_pool().await else {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return Ok(());
        };

        let connector_id = Uuid::new_v4();
        let property_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO connectors (id, property_id, system, vendor, signing_secret) \
             VALUES ($1, $2, 'pms', 'test-vendor', 'whsec_test')",
        )
        .bind(connector_id)
        .bind(property_id)
        .execute(&*pool)
        .await?;

        let repo = RawEventsRepository::new(Arc::clone(&pool));
        let event = crate::db::models::event_models::RawEvent {
            id: Uuid::new_v4(),
            property_id,
            connector_id,
            system: "pms".to_string(),
            vendor: "test-vendor".to_string(),
            occurred_at: Utc::now(),
            vendor_event_id: None,
            dedupe_key: format!("pms:test-vendor:{}", Uuid::new_v4()),
            signature_valid: true,
            payload: serde_json::json!({"event": "checkin"}),
            processing_error: None,
            created_at: Utc::now(),
        };

        let first = repo.insert(&event).await?;
        assert!(first.is_some());

        // Same dedupe key, new row id: must report as already processed.
        let replay = crate::db::models::event_models::RawEvent {
            id: Uuid::new_v4(),
            ..event
        };
        let second = repo.insert(&replay).await?;
        assert!(second.is_none());

        Ok(())
    }
}
