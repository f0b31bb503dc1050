use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::canonical::{self, sanitize, CanonicalContext, SourceSystem};
use crate::db::models::event_models::RawEvent;
use crate::db::repositories::canonical_events::CanonicalEventsRepository;
use crate::db::repositories::connectors::ConnectorsRepository;
use crate::db::repositories::raw_events::RawEventsRepository;
use crate::security::signature;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{body::Bytes, Json, Router};
use chrono::{TimeZone, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const TIMESTAMP_HEADER: &str = "x-hotelguard-timestamp";
const SIGNATURE_HEADER: &str = "x-hotelguard-signature";
const VENDOR_EVENT_ID_HEADER: &str = "x-vendor-event-id";

/// Response for an accepted webhook delivery
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub deduped: bool,
    pub raw_event_id: Option<Uuid>,
    pub normalized_count: u64,
}

/// Create the webhook intake router. The body limit applies before any
/// request handling, bounding work done on unauthenticated input.
pub fn create_router(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/:system/:property_id/:vendor",
            post(receive_webhook),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

/// Extract the hex digest from a `v1=<64 hex>` signature header
fn parse_signature_header(raw: &str) -> Option<&str> {
    let hex_part = raw.strip_prefix("v1=")?;
    if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(hex_part)
    } else {
        None
    }
}

/// Symmetric skew check: bounds replay exposure without requiring the
/// vendor clock to run behind ours.
fn within_replay_window(ts_ms: i64, now_ms: i64, window_secs: i64) -> bool {
    (now_ms - ts_ms).abs() <= window_secs * 1000
}

/// Dedupe key for a delivery: the vendor-assigned event id when one is
/// supplied, otherwise a content hash over the signed material.
fn compute_dedupe_key(
    system: &str,
    vendor: &str,
    vendor_event_id: Option<&str>,
    timestamp_header: &str,
    raw_body: &str,
) -> String {
    match vendor_event_id {
        Some(event_id) => format!("{}:{}:{}", system, vendor, event_id),
        None => signature::content_hash(&format!(
            "{}:{}:{}:{}",
            system, vendor, timestamp_header, raw_body
        )),
    }
}

/// Signed webhook intake: authenticate, replay-check, store raw event
/// idempotently, canonicalize, trigger recompute.
pub async fn receive_webhook(
    Path((system, property_id, vendor)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let system = SourceSystem::parse(&system)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown system: {}", system)))?;
    let property_id = Uuid::parse_str(&property_id)
        .map_err(|_| ApiError::bad_request("Invalid property id"))?;
    if vendor.trim().is_empty() {
        return Err(ApiError::bad_request("Missing vendor"));
    }

    let timestamp_header = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing timestamp header"))?
        .to_string();
    let supplied_signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_signature_header)
        .ok_or_else(|| ApiError::bad_request("Missing or malformed signature header"))?
        .to_string();

    let ts_ms = signature::parse_timestamp(&timestamp_header)
        .ok_or_else(|| ApiError::bad_request("Malformed timestamp header"))?;
    if !within_replay_window(
        ts_ms,
        Utc::now().timestamp_millis(),
        state.config.webhook.replay_window_secs,
    ) {
        warn!(
            "Rejected webhook outside replay window: property={} vendor={}",
            property_id, vendor
        );
        return Err(ApiError::unauthorized("Timestamp outside replay window"));
    }

    let raw_body = std::str::from_utf8(&body)
        .map_err(|_| ApiError::bad_request("Body is not valid UTF-8"))?;

    let connectors = ConnectorsRepository::new(Arc::clone(&state.db_pool));
    let connector = connectors
        .find_enabled(&property_id, system.as_str(), &vendor)
        .await?
        .ok_or_else(|| ApiError::not_found("Connector not found or disabled"))?;

    // The signed message includes the raw, unparsed body. Re-serializing
    // before signing would open a canonicalization bypass.
    let expected = signature::sign(
        &connector.signing_secret,
        &format!("{}.{}", timestamp_header, raw_body),
    );
    if !signature::verify(&supplied_signature, &expected) {
        warn!(
            "Signature mismatch: property={} system={} vendor={}",
            property_id,
            system.as_str(),
            vendor
        );
        return Err(ApiError::unauthorized("Signature mismatch"));
    }

    let payload: serde_json::Value = serde_json::from_str(raw_body)
        .map_err(|_| ApiError::bad_request("Body is not valid JSON"))?;

    let vendor_event_id = headers
        .get(VENDOR_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let dedupe_key = compute_dedupe_key(
        system.as_str(),
        &vendor,
        vendor_event_id.as_deref(),
        &timestamp_header,
        raw_body,
    );

    let occurred_at = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(Utc::now);
    let raw_event = RawEvent {
        id: Uuid::new_v4(),
        property_id,
        connector_id: connector.id,
        system: system.as_str().to_string(),
        vendor: vendor.clone(),
        occurred_at,
        vendor_event_id,
        dedupe_key,
        signature_valid: true,
        payload: sanitize::sanitize(&payload),
        processing_error: None,
        created_at: Utc::now(),
    };

    let raw_events = RawEventsRepository::new(Arc::clone(&state.db_pool));
    let Some(stored) = raw_events.insert(&raw_event).await? else {
        // Uniqueness collision: already processed. Safe under
        // at-least-once delivery.
        connectors.touch_last_seen(&connector.id).await?;
        info!(
            "Deduped webhook delivery: property={} vendor={}",
            property_id, vendor
        );
        return Ok(Json(WebhookResponse {
            ok: true,
            deduped: true,
            raw_event_id: None,
            normalized_count: 0,
        }));
    };

    let mapping = connector.connector_mapping();
    let ctx = CanonicalContext {
        mapping: mapping.as_ref(),
        system,
        vendor: &vendor,
        property_id,
        connector_id: connector.id,
        raw_event_id: stored.id,
        fallback_occurred_at: occurred_at,
    };
    let events = canonical::canonicalize(&payload, &ctx);

    let canonical_events = CanonicalEventsRepository::new(Arc::clone(&state.db_pool));
    let normalized_count = match canonical_events.insert_many(&events).await {
        Ok(count) => count,
        Err(e) => {
            // The raw event stays committed for replay and inspection.
            error!("Failed to store canonical events: {}", e);
            if let Err(attach_err) = raw_events
                .attach_processing_error(&stored.id, &e.to_string())
                .await
            {
                error!("Failed to record processing error: {}", attach_err);
            }
            return Err(ApiError::internal("Failed to store canonical events"));
        }
    };

    connectors.touch_last_seen(&connector.id).await?;

    let rooms: Vec<String> = events.iter().filter_map(|e| e.room_id.clone()).collect();
    if !rooms.is_empty() {
        if let Err(e) = state.risk.invoke(&rooms).await {
            warn!("Risk recompute failed after webhook: {}", e);
        }
    }

    info!(
        "Accepted webhook: property={} system={} vendor={} normalized={}",
        property_id,
        system.as_str(),
        vendor,
        normalized_count
    );

    Ok(Json(WebhookResponse {
        ok: true,
        deduped: false,
        raw_event_id: Some(stored.id),
        normalized_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_header_requires_v1_and_64_hex() {
        let valid = format!("v1={}", "a".repeat(64));
        assert_eq!(parse_signature_header(&valid), Some(&valid[3..]));
        assert!(parse_signature_header(&"a".repeat(64)).is_none());
        assert!(parse_signature_header("v1=tooshort").is_none());
        let bad_chars = format!("v1={}", "z".repeat(64));
        assert!(parse_signature_header(&bad_chars).is_none());
        let v2 = format!("v2={}", "a".repeat(64));
        assert!(parse_signature_header(&v2).is_none());
    }

    #[test]
    fn replay_window_is_symmetric() {
        let now = 1_700_000_000_000;
        assert!(within_replay_window(now - 299_000, now, 300));
        assert!(within_replay_window(now + 299_000, now, 300));
        assert!(!within_replay_window(now - 301_000, now, 300));
        assert!(!within_replay_window(now + 301_000, now, 300));
    }

    #[test]
    fn dedupe_key_prefers_vendor_event_id() {
        let keyed = compute_dedupe_key("pms", "cloudbeds", Some("evt_9"), "1700000000", "{}");
        assert_eq!(keyed, "pms:cloudbeds:evt_9");

        let hashed = compute_dedupe_key("pms", "cloudbeds", None, "1700000000", "{}");
        assert_eq!(hashed.len(), 64);
        assert_eq!(
            hashed,
            compute_dedupe_key("pms", "cloudbeds", None, "1700000000", "{}")
        );
        assert_ne!(
            hashed,
            compute_dedupe_key("pms", "cloudbeds", None, "1700000001", "{}")
        );
    }
}
