use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::db::models::cv_models::{FrameAnalysisRow, FrameObservation, RiskEvidence, VideoSummary};
use crate::db::repositories::cv_events::CvEventsRepository;
use crate::db::repositories::cv_review::CvReviewRepository;
use crate::security::signature;
use crate::services::analyzer::{AnalysisResult, BatchSummary};
use crate::services::ingest::{self, AnalyzedFrame};
use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, State};
use axum::http::{header, HeaderMap, Request};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

const API_KEY_HEADER: &str = "x-cv-api-key";
const DEFAULT_MIME_TYPE: &str = "image/jpeg";

// Base64-encoded frame batches are much larger than webhook bodies.
const MAX_BATCH_BYTES: usize = 32 * 1024 * 1024;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ingest/cv-images", post(ingest_cv_images))
        .route("/ingest/cv-images/health", get(cv_health))
        .route("/cv/room-risk", post(room_risk))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BATCH_BYTES))
}

/// One submitted frame, JSON form. Multipart submissions are converted
/// into the same shape, one item per file.
#[derive(Debug, Deserialize)]
struct CvItem {
    room_id: String,
    captured_at: String,
    #[serde(default)]
    camera_id: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    image_base64: String,
}

/// A structurally valid item ready for analysis
#[derive(Debug)]
struct ValidatedItem {
    room_id: String,
    timestamp: DateTime<Utc>,
    camera_id: Option<String>,
    video_id: Option<String>,
    mime_type: String,
    image: Vec<u8>,
}

/// Per-batch outcome. A 200 with a non-empty errors list is a valid
/// partial success; callers must inspect the list.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub accepted: usize,
    pub analyzed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub rooms: Vec<String>,
    pub evidence_saved: usize,
    pub summary: Option<BatchSummary>,
    pub errors: Vec<String>,
}

/// Check the shared CV API key. The health variant additionally accepts
/// the key as a bearer token. An unconfigured key disables the surface.
fn require_api_key(headers: &HeaderMap, api_key: &str, allow_bearer: bool) -> ApiResult<()> {
    if api_key.is_empty() {
        return Err(ApiError::unauthorized("CV ingestion is not configured"));
    }

    if let Some(supplied) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if signature::verify(supplied, api_key) {
            return Ok(());
        }
    }

    if allow_bearer {
        if let Some(token) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            if signature::verify(token, api_key) {
                return Ok(());
            }
        }
    }

    Err(ApiError::unauthorized("Invalid API key"))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Parse a JSON batch: either a bare array or `{"items": [...]}`
fn items_from_json(bytes: &[u8]) -> ApiResult<Vec<CvItem>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|_| ApiError::bad_request("Body is not valid JSON"))?;

    let raw_items = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(ApiError::bad_request("Expected an array or {items: [...]}")),
        },
        _ => return Err(ApiError::bad_request("Expected an array or {items: [...]}")),
    };

    let mut items = Vec::with_capacity(raw_items.len());
    for (index, raw) in raw_items.into_iter().enumerate() {
        let item: CvItem = serde_json::from_value(raw)
            .map_err(|e| ApiError::bad_request(format!("item {}: {}", index, e)))?;
        items.push(item);
    }

    Ok(items)
}

/// Derive items from a multipart form: shared metadata fields plus one
/// item per uploaded file.
async fn items_from_multipart(mut multipart: Multipart) -> ApiResult<Vec<CvItem>> {
    let mut room_id: Option<String> = None;
    let mut captured_at: Option<String> = None;
    let mut camera_id: Option<String> = None;
    let mut video_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "room_id" => room_id = Some(read_text_field(field).await?),
            "captured_at" => captured_at = Some(read_text_field(field).await?),
            "camera_id" => camera_id = Some(read_text_field(field).await?),
            "video_id" => video_id = Some(read_text_field(field).await?),
            "event_id" | "mime_type" => {
                // Accepted for wire compatibility; files carry their own
                // content type in multipart mode.
                let _ = read_text_field(field).await?;
            }
            _ => {
                let mime_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
                files.push((mime_type, bytes.to_vec()));
            }
        }
    }

    let room_id = room_id.ok_or_else(|| ApiError::bad_request("Missing room_id field"))?;
    let captured_at =
        captured_at.ok_or_else(|| ApiError::bad_request("Missing captured_at field"))?;
    if files.is_empty() {
        return Err(ApiError::bad_request("Multipart body carries no files"));
    }

    Ok(files
        .into_iter()
        .map(|(mime_type, bytes)| CvItem {
            room_id: room_id.clone(),
            captured_at: captured_at.clone(),
            camera_id: camera_id.clone(),
            video_id: video_id.clone(),
            mime_type: Some(mime_type),
            image_base64: STANDARD.encode(bytes),
        })
        .collect())
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed form field: {}", e)))
}

/// Structural validation is fail-fast: one malformed item rejects the
/// whole batch, naming the offending index.
fn validate_items(items: Vec<CvItem>) -> ApiResult<Vec<ValidatedItem>> {
    let mut validated = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        if item.room_id.trim().is_empty() {
            return Err(ApiError::bad_request(format!("item {}: missing room_id", index)));
        }
        let timestamp = DateTime::parse_from_rfc3339(&item.captured_at)
            .map_err(|_| {
                ApiError::bad_request(format!(
                    "item {}: captured_at must be ISO-8601 with an explicit offset",
                    index
                ))
            })?
            .with_timezone(&Utc);
        let image = STANDARD
            .decode(item.image_base64.as_bytes())
            .map_err(|_| ApiError::bad_request(format!("item {}: invalid image_base64", index)))?;
        if image.is_empty() {
            return Err(ApiError::bad_request(format!("item {}: empty image", index)));
        }

        validated.push(ValidatedItem {
            room_id: item.room_id.trim().to_string(),
            timestamp,
            camera_id: item.camera_id,
            video_id: item.video_id.filter(|v| !v.trim().is_empty()),
            mime_type: item.mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            image,
        });
    }
    Ok(validated)
}

/// CV frame-batch intake: analyze, dedup, fold the monotonic entry
/// counter, persist evidence, trigger recompute.
pub async fn ingest_cv_images(
    State(state): State<AppState>,
    request: Request<Body>,
) -> ApiResult<Json<IngestResponse>> {
    let headers = request.headers().clone();
    require_api_key(&headers, &state.config.cv.api_key, false)?;

    let items = if is_multipart(&headers) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?;
        items_from_multipart(multipart).await?
    } else {
        let bytes = Bytes::from_request(request, &state)
            .await
            .map_err(|_| ApiError::bad_request("Failed to read body"))?;
        items_from_json(&bytes)?
    };

    if items.is_empty() {
        return Err(ApiError::bad_request("Empty batch"));
    }
    let validated = validate_items(items)?;
    let accepted = validated.len();

    let mut errors: Vec<String> = Vec::new();
    let mut frames: Vec<AnalyzedFrame> = Vec::new();

    // Per-item analysis is independent and bounded by the analyzer
    // timeout, so the calls run concurrently; a timeout or schema
    // failure on one frame never aborts the batch. Counter ordering is
    // unaffected: the fold below happens only after every item is back.
    let analyses = join_all(
        validated
            .iter()
            .map(|item| state.analyzer.analyze_frame(&item.image, &item.mime_type)),
    )
    .await;

    for (index, (item, result)) in validated.into_iter().zip(analyses).enumerate() {
        match result {
            Ok(analysis) => frames.push(AnalyzedFrame {
                room_id: item.room_id,
                timestamp: item.timestamp,
                camera_id: item.camera_id,
                video_id: item.video_id,
                mime_type: item.mime_type,
                image: item.image,
                analysis,
            }),
            Err(e) => errors.push(format!("item {}: analysis failed: {}", index, e)),
        }
    }

    if frames.is_empty() {
        return Err(ApiError::bad_gateway(format!(
            "All items failed analysis: {}",
            errors.join("; ")
        )));
    }
    let analyzed = frames.len();

    // Seed per-room counters and dedup keys from the trailing window.
    let window_start = Utc::now() - Duration::minutes(state.config.cv.entry_window_minutes);
    let cv_events = CvEventsRepository::new(Arc::clone(&state.db_pool));
    let rooms_in_batch: BTreeSet<String> = frames.iter().map(|f| f.room_id.clone()).collect();

    let mut baselines: HashMap<String, i32> = HashMap::new();
    let mut existing: HashSet<(String, DateTime<Utc>)> = HashSet::new();
    for room in &rooms_in_batch {
        baselines.insert(
            room.clone(),
            cv_events.max_entry_count_since(room, window_start).await?,
        );
        for timestamp in cv_events.existing_timestamps_since(room, window_start).await? {
            existing.insert((room.clone(), timestamp));
        }
    }

    let outcome = ingest::fold_observations(&frames, &baselines, &existing);
    for (room, timestamp) in &outcome.skipped {
        info!("Skipped duplicate observation: room={} at={}", room, timestamp);
    }

    let mut inserted = 0usize;
    let mut rooms_touched: BTreeSet<String> = BTreeSet::new();
    for row in &outcome.rows {
        let observation = FrameObservation {
            id: Uuid::new_v4(),
            room_id: row.room_id.clone(),
            person_count: row.person_count,
            entry_count: row.entry_count,
            timestamp: row.timestamp,
            created_at: Utc::now(),
        };
        match cv_events.insert(&observation).await {
            Ok(true) => {
                inserted += 1;
                rooms_touched.insert(row.room_id.clone());
            }
            Ok(false) => {
                // Lost a race with a concurrent batch; the stored row wins.
                info!(
                    "Observation already present: room={} at={}",
                    row.room_id, row.timestamp
                );
            }
            Err(e) => errors.push(format!("room {}: observation insert failed: {}", row.room_id, e)),
        }
    }

    let review = CvReviewRepository::new(Arc::clone(&state.db_pool));

    // Frame analyses are kept for every tracked frame regardless of
    // evidence selection, so later summarization has full context.
    for frame in frames.iter() {
        let Some(video_id) = frame.video_id.clone() else {
            continue;
        };
        let row = FrameAnalysisRow {
            id: Uuid::new_v4(),
            video_id,
            room_id: frame.room_id.clone(),
            timestamp: frame.timestamp,
            person_count: frame.analysis.person_count as i32,
            entry: frame.analysis.entry,
            confidence: frame.analysis.confidence,
            suspicion: frame.analysis.suspicion,
            anomalies: serde_json::json!(frame.analysis.anomalies),
            summary: frame.analysis.summary.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = review.upsert_frame_analysis(&row).await {
            errors.push(format!(
                "room {}: frame analysis upsert failed: {}",
                frame.room_id, e
            ));
        }
    }

    // Bounded evidence: top suspicion scores above the threshold, with
    // image bytes, for human review.
    let selected = ingest::select_evidence(
        &frames,
        state.config.cv.suspicion_threshold,
        state.config.cv.evidence_cap,
    );
    let mut evidence_saved = 0usize;
    for frame in &selected {
        let Some(video_id) = frame.video_id.clone() else {
            continue;
        };
        let evidence = RiskEvidence {
            id: Uuid::new_v4(),
            video_id,
            room_id: frame.room_id.clone(),
            timestamp: frame.timestamp,
            suspicion: frame.analysis.suspicion,
            mime_type: frame.mime_type.clone(),
            image: frame.image.clone(),
            created_at: Utc::now(),
        };
        match review.insert_evidence(&evidence).await {
            Ok(()) => evidence_saved += 1,
            Err(e) => errors.push(format!("room {}: evidence insert failed: {}", frame.room_id, e)),
        }
    }

    // Tracked videos get their aggregate row refreshed on every batch.
    let video_ids: BTreeSet<String> = frames.iter().filter_map(|f| f.video_id.clone()).collect();
    for video_id in &video_ids {
        let video_frames: Vec<&AnalyzedFrame> = frames
            .iter()
            .filter(|f| f.video_id.as_deref() == Some(video_id))
            .collect();
        let (risk_level, risk_score, recommendation) = ingest::summarize_video(&video_frames);
        let summary = VideoSummary {
            id: Uuid::new_v4(),
            video_id: video_id.clone(),
            room_id: video_frames[0].room_id.clone(),
            risk_level,
            risk_score,
            recommendation,
            updated_at: Utc::now(),
        };
        if let Err(e) = review.upsert_video_summary(&summary).await {
            errors.push(format!("video {}: summary upsert failed: {}", video_id, e));
        }
    }

    // Batch-level summarization only applies to untracked (legacy
    // per-image) batches; failure is non-fatal.
    let summary = if video_ids.is_empty() {
        let analyses: Vec<AnalysisResult> = frames.iter().map(|f| f.analysis.clone()).collect();
        match state.analyzer.summarize_batch(&analyses).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                errors.push(format!("batch summary failed: {}", e));
                None
            }
        }
    } else {
        None
    };

    // Best-effort nudge; committed observations stay committed even if
    // the recompute call fails.
    if !rooms_touched.is_empty() {
        let rooms: Vec<String> = rooms_touched.iter().cloned().collect();
        if let Err(e) = state.risk.invoke(&rooms).await {
            warn!("Risk recompute failed: {}", e);
            errors.push(format!("risk recompute failed: {}", e));
        }
    }

    info!(
        "CV batch: accepted={} analyzed={} inserted={} evidence={} errors={}",
        accepted,
        analyzed,
        inserted,
        evidence_saved,
        errors.len()
    );

    Ok(Json(IngestResponse {
        ok: true,
        accepted,
        analyzed,
        inserted,
        skipped: outcome.skipped.len(),
        rooms: rooms_touched.into_iter().collect(),
        evidence_saved,
        summary,
        errors,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RoomRiskRequest {
    pub room_id: String,
}

#[derive(Debug, Serialize)]
pub struct RoomRiskResponse {
    pub room_id: String,
    pub risk_score: Option<f64>,
    pub high_risk: bool,
}

/// Current risk score for a room. The high-risk flag is a read-time
/// projection against the configured threshold; nothing is persisted.
pub async fn room_risk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RoomRiskRequest>,
) -> ApiResult<Json<RoomRiskResponse>> {
    require_api_key(&headers, &state.config.cv.api_key, false)?;

    if request.room_id.trim().is_empty() {
        return Err(ApiError::bad_request("Missing room_id"));
    }

    let review = CvReviewRepository::new(Arc::clone(&state.db_pool));
    let score = review.latest_risk_score(request.room_id.trim()).await?;

    let risk_score = score.map(|s| s.score);
    let high_risk = risk_score
        .map(|s| s >= state.config.cv.risk_threshold)
        .unwrap_or(false);

    Ok(Json(RoomRiskResponse {
        room_id: request.room_id.trim().to_string(),
        risk_score,
        high_risk,
    }))
}

#[derive(Debug, Serialize)]
struct CvHealthResponse {
    ok: bool,
    database: bool,
}

/// Authenticated health variant for the CV uploader; accepts the shared
/// key as either header form.
async fn cv_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CvHealthResponse>> {
    require_api_key(&headers, &state.config.cv.api_key, true)?;

    let database = sqlx::query("SELECT 1").execute(&*state.db_pool).await.is_ok();
    Ok(Json(CvHealthResponse { ok: true, database }))
}
