use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// Keys whose values never leave the intake path. Matched anywhere in the
// key so nested vendor spellings (e.g. "primary_guest_name") are caught.
static NAME_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(guest[_-]?name|first[_-]?name|last[_-]?name|full[_-]?name|^name$)")
        .expect("valid name-key pattern")
});

// Keys holding device or personal identifiers. Their string values are
// replaced by a digest so correlation stays possible without clear text.
static IDENTIFIER_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(device[_-]?id|mac([_-]?address)?$|imei|serial([_-]?(no|number))?|phone([_-]?number)?|email([_-]?address)?|passport|id[_-]?number)",
    )
    .expect("valid identifier-key pattern")
});

/// Recursively scrub PII from a JSON tree.
///
/// Name-like keys are dropped entirely; identifier-like keys keep a
/// `sha256:<hex>` digest of their string value. Everything else is
/// copied through, including nested objects and arrays.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                if NAME_KEY.is_match(key) {
                    continue;
                }
                if IDENTIFIER_KEY.is_match(key) {
                    if let Value::String(s) = inner {
                        out.insert(key.clone(), Value::String(digest_value(s)));
                        continue;
                    }
                }
                out.insert(key.clone(), sanitize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn digest_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_name_like_keys() {
        let payload = json!({
            "guest_name": "Alex Smith",
            "first_name": "Alex",
            "lastName": "Smith",
            "room_id": "304"
        });
        let clean = sanitize(&payload);
        assert!(clean.get("guest_name").is_none());
        assert!(clean.get("first_name").is_none());
        assert!(clean.get("lastName").is_none());
        assert_eq!(clean["room_id"], json!("304"));
    }

    #[test]
    fn digests_identifier_values() {
        let payload = json!({"device_id": "AA:BB:CC", "phone": "+15550100"});
        let clean = sanitize(&payload);
        let device = clean["device_id"].as_str().unwrap();
        assert!(device.starts_with("sha256:"));
        assert_eq!(device.len(), "sha256:".len() + 64);
        assert!(clean["phone"].as_str().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn recurses_into_nested_structures() {
        let payload = json!({
            "reservation": {
                "guest_name": "Alex",
                "stays": [{"email": "a@example.com", "room": "101"}]
            }
        });
        let clean = sanitize(&payload);
        assert!(clean["reservation"].get("guest_name").is_none());
        let stay = &clean["reservation"]["stays"][0];
        assert!(stay["email"].as_str().unwrap().starts_with("sha256:"));
        assert_eq!(stay["room"], json!("101"));
    }

    #[test]
    fn non_string_identifier_values_are_recursed_not_digested() {
        let payload = json!({"device_id": {"vendor": "acme"}});
        let clean = sanitize(&payload);
        assert_eq!(clean["device_id"]["vendor"], json!("acme"));
    }
}
