use crate::db::models::connector_models::Connector;
use crate::error::Error;
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Connectors repository for webhook authentication lookups
#[derive(Clone)]
pub struct ConnectorsRepository {
    pool: Arc<PgPool>,
}

impl ConnectorsRepository {
    /// Create a new connectors repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Look up the enabled connector for a (property, system, vendor) triple
    pub async fn find_enabled(
        &self,
        property_id: &Uuid,
        system: &str,
        vendor: &str,
    ) -> Result<Option<Connector>> {
        let result = sqlx::query_as::<_, Connector>(
            r#"
            SELECT id, property_id, system, vendor, signing_secret, enabled, mapping, last_seen_at, created_at
            FROM connectors
            WHERE property_id = $1 AND system = $2 AND vendor = $3 AND enabled
            "#,
        )
        .bind(property_id)
        .bind(system)
        .bind(vendor)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to look up connector: {}", e)))?;

        Ok(result)
    }

    /// Update connector liveness after an accepted delivery
    pub async fn touch_last_seen(&self, id: &Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connectors
            SET last_seen_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update connector liveness: {}", e)))?;

        Ok(())
    }
}
