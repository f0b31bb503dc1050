use crate::db::models::event_models::CanonicalEvent;
use crate::error::Error;
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

/// Canonical events repository
#[derive(Clone)]
pub struct CanonicalEventsRepository {
    pool: Arc<PgPool>,
}

impl CanonicalEventsRepository {
    /// Create a new canonical events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert the canonical events produced from one raw event. Returns
    /// the number of rows written.
    pub async fn insert_many(&self, events: &[CanonicalEvent]) -> Result<u64> {
        let mut inserted = 0u64;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO canonical_events (
                    id, property_id, connector_id, system, vendor, event_type,
                    occurred_at, entity_type, entity_id, room_id, data, raw_event_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(event.id)
            .bind(event.property_id)
            .bind(event.connector_id)
            .bind(&event.system)
            .bind(&event.vendor)
            .bind(&event.event_type)
            .bind(event.occurred_at)
            .bind(&event.entity_type)
            .bind(&event.entity_id)
            .bind(&event.room_id)
            .bind(&event.data)
            .bind(event.raw_event_id)
            .bind(event.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to insert canonical event: {}", e)))?;
            inserted += 1;
        }

        Ok(inserted)
    }
}
