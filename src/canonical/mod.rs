use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::models::event_models::CanonicalEvent;
use crate::security::signature;

pub mod classify;
pub mod sanitize;

/// Source systems accepted on the webhook path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSystem {
    Pms,
    Housekeeping,
}

impl SourceSystem {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pms" => Some(Self::Pms),
            "housekeeping" => Some(Self::Housekeeping),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pms => "pms",
            Self::Housekeeping => "housekeeping",
        }
    }

    /// Event type used when nothing else resolves
    fn default_event_type(&self) -> &'static str {
        match self {
            Self::Pms => "PMS_EVENT",
            Self::Housekeeping => "HOUSEKEEPING_EVENT",
        }
    }
}

/// Per-connector mapping configuration, stored as JSONB on the connector
/// row and owned by the external admin flow. Read-only at ingestion time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectorMapping {
    /// Vendor event-type spelling -> canonical event type
    #[serde(default)]
    pub event_types: HashMap<String, String>,
    /// Canonical field -> ordered candidate JSON paths, first match wins
    #[serde(default)]
    pub field_paths: HashMap<String, Vec<String>>,
    /// Prefixes stripped off vendor room identifiers
    #[serde(default)]
    pub room_prefixes: Vec<String>,
    /// Zero-pad normalized room ids to 4 digits
    #[serde(default)]
    pub room_pad_to_four: bool,
    /// Per-field categorical value remapping tables
    #[serde(default)]
    pub value_maps: HashMap<String, HashMap<String, String>>,
}

impl ConnectorMapping {
    fn paths_for(&self, field: &str) -> Option<&[String]> {
        self.field_paths.get(field).map(|p| p.as_slice())
    }
}

/// Default probe paths applied when the connector carries no mapping for
/// a canonical field. Probed in order, first non-empty value wins.
fn default_paths(field: &str) -> &'static [&'static str] {
    match field {
        "event_type" => &["event_type", "type", "event", "action", "status"],
        "occurred_at" => &["occurred_at", "timestamp", "time", "event_time", "created_at"],
        "room" => &["room_id", "room", "room_number", "location.room", "unit"],
        "stay" => &["stay_id", "reservation_id", "booking_id", "reservation.id"],
        "zone" => &["zone_id", "zone", "area"],
        "entity" => &["entity_id", "subject_id"],
        "entity_type" => &["entity_type", "subject_type"],
        "notes" => &["notes", "note", "comment", "description", "message"],
        _ => &[],
    }
}

/// Walk a dot-separated path through a JSON tree. Numeric segments index
/// into arrays. Returns None for missing nodes, JSON null, and empty
/// strings, so a present-but-empty vendor field falls through to the
/// next candidate path.
pub fn probe_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other),
    }
}

/// Probe an ordered list of candidate paths, first match wins.
fn probe_first<'a>(
    payload: &'a Value,
    mapping: Option<&ConnectorMapping>,
    field: &str,
) -> Option<&'a Value> {
    if let Some(paths) = mapping.and_then(|m| m.paths_for(field)) {
        for path in paths {
            if let Some(value) = probe_path(payload, path) {
                return Some(value);
            }
        }
        return None;
    }
    for path in default_paths(field) {
        if let Some(value) = probe_path(payload, path) {
            return Some(value);
        }
    }
    None
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Normalize a vendor room identifier: strip configured prefixes, then
/// zero-pad to 4 digits when configured. An empty result means no room.
pub fn normalize_room_id(raw: &str, mapping: Option<&ConnectorMapping>) -> Option<String> {
    let mut room = raw.trim().to_string();

    if let Some(mapping) = mapping {
        for prefix in &mapping.room_prefixes {
            if let Some(stripped) = room.strip_prefix(prefix.as_str()) {
                room = stripped.trim_start_matches(['-', '_', ' ']).to_string();
                break;
            }
        }
        if mapping.room_pad_to_four && !room.is_empty() && room.len() < 4 {
            room = format!("{:0>4}", room);
        }
    }

    if room.is_empty() {
        None
    } else {
        Some(room)
    }
}

/// Resolve the canonical event type for a raw vendor spelling.
///
/// Lookup order: exact synonym, lower-cased synonym, the housekeeping
/// notes classifier (housekeeping connectors only), UPPER_SNAKE of the
/// raw spelling, and finally the system default.
fn resolve_event_type(
    raw_type: Option<&str>,
    notes: Option<&str>,
    mapping: Option<&ConnectorMapping>,
    system: SourceSystem,
) -> String {
    if let Some(raw) = raw_type {
        if let Some(mapping) = mapping {
            if let Some(canonical) = mapping.event_types.get(raw) {
                return canonical.clone();
            }
            if let Some(canonical) = mapping.event_types.get(&raw.to_lowercase()) {
                return canonical.clone();
            }
        }
    }

    if system == SourceSystem::Housekeeping {
        let free_text = notes.or(raw_type);
        if let Some(text) = free_text {
            if let Some(classified) = classify::classify_notes(text) {
                return classified.to_string();
            }
        }
    }

    if let Some(raw) = raw_type {
        return to_upper_snake(raw);
    }

    system.default_event_type().to_string()
}

/// "room ready" / "room-ready" / "RoomReady" -> "ROOM_READY"
fn to_upper_snake(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if prev_lower && ch.is_uppercase() {
                out.push('_');
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            prev_lower = false;
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Inputs for one canonicalization pass
pub struct CanonicalContext<'a> {
    pub mapping: Option<&'a ConnectorMapping>,
    pub system: SourceSystem,
    pub vendor: &'a str,
    pub property_id: Uuid,
    pub connector_id: Uuid,
    pub raw_event_id: Uuid,
    /// Used when the payload carries no parseable occurrence time
    pub fallback_occurred_at: DateTime<Utc>,
}

/// Map a raw vendor payload onto canonical events.
///
/// Returns a list to allow future fan-out; the current engine always
/// emits exactly one event. Unmapped fields yield None/omitted values
/// rather than errors; callers decide whether that is acceptable.
pub fn canonicalize(payload: &Value, ctx: &CanonicalContext<'_>) -> Vec<CanonicalEvent> {
    let mapping = ctx.mapping;

    let raw_type = probe_first(payload, mapping, "event_type").and_then(value_to_string);
    let notes = probe_first(payload, mapping, "notes").and_then(value_to_string);
    let event_type = resolve_event_type(
        raw_type.as_deref(),
        notes.as_deref(),
        mapping,
        ctx.system,
    );

    let occurred_at = probe_first(payload, mapping, "occurred_at")
        .and_then(value_to_string)
        .and_then(|raw| signature::parse_timestamp(&raw))
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(ctx.fallback_occurred_at);

    let room_id = probe_first(payload, mapping, "room")
        .and_then(value_to_string)
        .and_then(|raw| normalize_room_id(&raw, mapping));

    let stay_id = probe_first(payload, mapping, "stay").and_then(value_to_string);
    let zone_id = probe_first(payload, mapping, "zone").and_then(value_to_string);
    let explicit_entity = probe_first(payload, mapping, "entity").and_then(value_to_string);

    // Entity id is never left empty: explicit id, stay, zone, room, then
    // the literal "unknown".
    let (entity_type, entity_id) = if let Some(id) = explicit_entity {
        let declared = probe_first(payload, mapping, "entity_type")
            .and_then(value_to_string)
            .map(|t| t.to_lowercase())
            .filter(|t| matches!(t.as_str(), "stay" | "room" | "zone"));
        (declared.unwrap_or_else(|| "stay".to_string()), id)
    } else if let Some(id) = stay_id {
        ("stay".to_string(), id)
    } else if let Some(id) = zone_id {
        ("zone".to_string(), id)
    } else if let Some(id) = room_id.clone() {
        ("room".to_string(), id)
    } else {
        ("room".to_string(), "unknown".to_string())
    };

    let mut data = sanitize::sanitize(payload);
    apply_value_maps(&mut data, mapping);

    vec![CanonicalEvent {
        id: Uuid::new_v4(),
        property_id: ctx.property_id,
        connector_id: ctx.connector_id,
        system: ctx.system.as_str().to_string(),
        vendor: ctx.vendor.to_string(),
        event_type,
        occurred_at,
        entity_type,
        entity_id,
        room_id,
        data,
        raw_event_id: ctx.raw_event_id,
        created_at: Utc::now(),
    }]
}

/// Remap categorical values on top-level data fields per the connector's
/// value-remapping tables.
fn apply_value_maps(data: &mut Value, mapping: Option<&ConnectorMapping>) {
    let Some(mapping) = mapping else { return };
    let Value::Object(map) = data else { return };
    for (field, table) in &mapping.value_maps {
        if let Some(Value::String(current)) = map.get(field) {
            if let Some(replacement) = table.get(current) {
                map.insert(field.clone(), Value::String(replacement.clone()));
            }
        }
    }
}
