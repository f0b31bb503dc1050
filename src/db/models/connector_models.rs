use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::ConnectorMapping;

/// Connector model: a configured (property, system, vendor) integration
/// with a shared signing secret
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Connector {
    pub id: Uuid,
    pub property_id: Uuid,
    pub system: String,
    pub vendor: String,
    pub signing_secret: String,
    pub enabled: bool,
    pub mapping: Option<serde_json::Value>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Connector {
    /// Deserialize the JSONB mapping column. A missing or malformed
    /// mapping falls back to defaults rather than failing ingestion.
    pub fn connector_mapping(&self) -> Option<ConnectorMapping> {
        self.mapping
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}
