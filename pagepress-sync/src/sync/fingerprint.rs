use std::time::SystemTime;

use serde_json::Value;
use time::OffsetDateTime;

/// Deterministic change-detection digest of a structured record. Object keys
/// are sorted before concatenation, so the property-insertion order used to
/// build the record never affects the result; array order is significant.
/// MD5 is fine here: the goal is no-op detection, not integrity.
pub fn fingerprint(value: &Value) -> String {
    format!("{:x}", md5::compute(flatten(value)))
}

/// Digest of an already-encoded resource payload, hashed exactly as it goes
/// over the wire so it compares against the server-side checksum.
pub fn content_checksum(encoded: &str) -> String {
    format!("{:x}", md5::compute(encoded))
}

/// Renders a date in the fixed GMT wire format used inside fingerprints and
/// publish payloads, e.g. "Mon, 01 Jan 2024 00:00:00 GMT".
pub fn http_date(value: OffsetDateTime) -> String {
    httpdate::fmt_http_date(SystemTime::from(value))
}

fn flatten(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        // Scalars with no keys flatten to nothing, matching the historical
        // checksum behavior.
        Value::Bool(_) => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items.iter().map(flatten).collect::<Vec<_>>().join(","),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.iter()
                .map(|key| format!("{key}:{}", flatten(&map[key.as_str()])))
                .collect::<Vec<_>>()
                .join(";")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use time::macros::datetime;

    #[test]
    fn key_insertion_order_does_not_matter() {
        let mut forward = Map::new();
        forward.insert("a".into(), json!(1));
        forward.insert("b".into(), json!(2));

        let mut backward = Map::new();
        backward.insert("b".into(), json!(2));
        backward.insert("a".into(), json!(1));

        assert_eq!(
            fingerprint(&Value::Object(forward)),
            fingerprint(&Value::Object(backward))
        );
    }

    #[test]
    fn array_order_matters() {
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn nested_records_flatten_recursively() {
        assert_eq!(
            flatten(&json!({ "outer": { "b": "2", "a": [1, "x"] }, "plain": "y" })),
            "outer:a:1,x;b:2;plain:y"
        );
    }

    #[test]
    fn null_and_bool_flatten_to_nothing() {
        assert_eq!(flatten(&json!(null)), "");
        assert_eq!(flatten(&json!(true)), "");
        assert_eq!(flatten(&json!({ "a": null })), "a:");
    }

    #[test]
    fn numbers_render_decimal() {
        assert_eq!(flatten(&json!(3)), "3");
        assert_eq!(flatten(&json!(1.5)), "1.5");
    }

    #[test]
    fn http_date_uses_gmt_format() {
        let date = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(http_date(date), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn fingerprint_is_hex_md5_of_canonical_string() {
        // md5("a:1;b:2")
        assert_eq!(
            fingerprint(&json!({ "b": 2, "a": 1 })),
            format!("{:x}", md5::compute("a:1;b:2"))
        );
    }
}
