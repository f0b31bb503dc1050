use crate::db::models::cv_models::{FrameAnalysisRow, RiskEvidence, RiskScore, VideoSummary};
use crate::error::Error;
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

/// Repository for the human-review side of the CV pipeline: per-frame
/// analyses, capped evidence frames, video summaries, and the risk
/// scores the external aggregator maintains.
#[derive(Clone)]
pub struct CvReviewRepository {
    pool: Arc<PgPool>,
}

impl CvReviewRepository {
    /// Create a new review repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Upsert a frame analysis keyed by (video, room, timestamp) so a
    /// replayed batch refreshes rather than duplicates.
    pub async fn upsert_frame_analysis(&self, row: &FrameAnalysisRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cv_frame_analysis (
                id, video_id, room_id, timestamp, person_count, entry,
                confidence, suspicion, anomalies, summary, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (video_id, room_id, timestamp) DO UPDATE SET
                person_count = EXCLUDED.person_count,
                entry = EXCLUDED.entry,
                confidence = EXCLUDED.confidence,
                suspicion = EXCLUDED.suspicion,
                anomalies = EXCLUDED.anomalies,
                summary = EXCLUDED.summary
            "#,
        )
        .bind(row.id)
        .bind(&row.video_id)
        .bind(&row.room_id)
        .bind(row.timestamp)
        .bind(row.person_count)
        .bind(row.entry)
        .bind(row.confidence)
        .bind(row.suspicion)
        .bind(&row.anomalies)
        .bind(&row.summary)
        .bind(row.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert frame analysis: {}", e)))?;

        Ok(())
    }

    /// Append an evidence frame with its image bytes
    pub async fn insert_evidence(&self, evidence: &RiskEvidence) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cv_risk_evidence (
                id, video_id, room_id, timestamp, suspicion, mime_type, image, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(evidence.id)
        .bind(&evidence.video_id)
        .bind(&evidence.room_id)
        .bind(evidence.timestamp)
        .bind(evidence.suspicion)
        .bind(&evidence.mime_type)
        .bind(&evidence.image)
        .bind(evidence.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert evidence: {}", e)))?;

        Ok(())
    }

    /// Upsert the aggregate summary for a video as later batches arrive
    pub async fn upsert_video_summary(&self, summary: &VideoSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cv_video_summaries (
                id, video_id, room_id, risk_level, risk_score, recommendation, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (video_id) DO UPDATE SET
                room_id = EXCLUDED.room_id,
                risk_level = EXCLUDED.risk_level,
                risk_score = EXCLUDED.risk_score,
                recommendation = EXCLUDED.recommendation,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(summary.id)
        .bind(&summary.video_id)
        .bind(&summary.room_id)
        .bind(&summary.risk_level)
        .bind(summary.risk_score)
        .bind(&summary.recommendation)
        .bind(summary.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert video summary: {}", e)))?;

        Ok(())
    }

    /// Latest aggregated risk score for a room, if one exists
    pub async fn latest_risk_score(&self, room_id: &str) -> Result<Option<RiskScore>> {
        let result = sqlx::query_as::<_, RiskScore>(
            r#"
            SELECT room_id, score, updated_at
            FROM risk_scores
            WHERE room_id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read risk score: {}", e)))?;

        Ok(result)
    }
}
