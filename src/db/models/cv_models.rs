use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One timestamped room observation (cv_events row). The entry counter
/// is cumulative within the trailing one-hour window for the room and
/// never decreases across consecutive observations in that window.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FrameObservation {
    pub id: Uuid,
    pub room_id: String,
    pub person_count: i32,
    pub entry_count: i32,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-frame vision output (cv_frame_analysis row), upserted on
/// (video_id, room_id, timestamp)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FrameAnalysisRow {
    pub id: Uuid,
    pub video_id: String,
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub person_count: i32,
    pub entry: bool,
    pub confidence: f64,
    pub suspicion: f64,
    pub anomalies: serde_json::Value,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A frame retained for human review (cv_risk_evidence row); append-only
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RiskEvidence {
    pub id: Uuid,
    pub video_id: String,
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub suspicion: f64,
    pub mime_type: String,
    pub image: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate judgment for one tracked video (cv_video_summaries row),
/// upserted as later batches for the same video arrive
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoSummary {
    pub id: Uuid,
    pub video_id: String,
    pub room_id: String,
    pub risk_level: String,
    pub risk_score: f64,
    pub recommendation: String,
    pub updated_at: DateTime<Utc>,
}

/// Latest aggregated risk score for a room, written by the external
/// aggregation function and only read here
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RiskScore {
    pub room_id: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}
