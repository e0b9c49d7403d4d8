//! Field readers shared by the title harmonizer and the session router, so both
//! read a payload the same way.

use serde_json::Value;

/// First non-blank string among `keys`, trimmed.
pub fn text<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        payload
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

/// First non-negative count among `keys`. Floats are rounded and numeric strings
/// are parsed.
pub fn number(payload: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(value_as_u64))
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .map(|value| value.round() as u64)
        }),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Outcome of a completion payload. An explicit `success` flag wins; otherwise
/// any non-empty `error` means failure.
pub fn succeeded(payload: &Value) -> bool {
    if let Some(success) = payload.get("success").and_then(Value::as_bool) {
        return success;
    }
    match payload.get("error") {
        None | Some(Value::Null) => true,
        Some(Value::String(error)) => error.trim().is_empty(),
        Some(_) => false,
    }
}

/// Expert tag without its leading `@`.
pub fn profile_tag(payload: &Value) -> Option<&str> {
    text(payload, &["profile_tag", "slave_profile_tag", "tag"])
        .map(|tag| tag.trim_start_matches('@'))
        .filter(|tag| !tag.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_field_alone_marks_failure() {
        assert!(!succeeded(&json!({"error": "timeout"})));
        assert!(!succeeded(&json!({"error": {"code": 504}})));
        assert!(succeeded(&json!({"error": null})));
        assert!(succeeded(&json!({"error": "  "})));
        assert!(succeeded(&json!({})));
        assert!(succeeded(&json!({"success": true, "error": "ignored"})));
        assert!(!succeeded(&json!({"success": false})));
    }

    #[test]
    fn numbers_accept_floats_and_numeric_strings() {
        let payload = json!({"a": 2.6, "b": " 41 ", "c": -3, "d": "n/a"});
        assert_eq!(number(&payload, &["a"]), Some(3));
        assert_eq!(number(&payload, &["b"]), Some(41));
        assert_eq!(number(&payload, &["c", "d"]), None);
        assert_eq!(number(&payload, &["missing", "b"]), Some(41));
    }

    #[test]
    fn text_and_tags_skip_blank_values() {
        let payload = json!({"profile_tag": " ", "tag": "@SQL", "name": "  rows  "});
        assert_eq!(profile_tag(&payload), Some("SQL"));
        assert_eq!(text(&payload, &["title", "name"]), Some("rows"));
        assert_eq!(profile_tag(&json!({"tag": "@"})), None);
    }
}
