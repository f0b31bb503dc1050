use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record of an authenticated but not-yet-interpreted vendor
/// payload. The payload column holds the sanitized body; the only
/// mutation ever applied is attaching a later processing error.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawEvent {
    pub id: Uuid,
    pub property_id: Uuid,
    pub connector_id: Uuid,
    pub system: String,
    pub vendor: String,
    pub occurred_at: DateTime<Utc>,
    pub vendor_event_id: Option<String>,
    pub dedupe_key: String,
    pub signature_valid: bool,
    pub payload: serde_json::Value,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalized, vendor-independent event. Created by the canonicalization
/// engine, one-to-many per raw event, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanonicalEvent {
    pub id: Uuid,
    pub property_id: Uuid,
    pub connector_id: Uuid,
    pub system: String,
    pub vendor: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub entity_type: String,
    pub entity_id: String,
    pub room_id: Option<String>,
    pub data: serde_json::Value,
    pub raw_event_id: Uuid,
    pub created_at: DateTime<Utc>,
}
