//! Lenient value access and coercion over `serde_json` trees.

use base64::Engine;
use chrono::DateTime;
use serde_json::Value;

/// Returns the entry for `key` when `value` is an object.
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| map.get(key))
}

/// Returns the first dotted `path` in `value` that resolves to a usable leaf.
///
/// Each path traverses object keys segment by segment. A resolved leaf that
/// is `null` or an empty string does not count as a match; lookup continues
/// with the next candidate path.
pub fn first<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    for path in paths {
        let mut current = value;
        let mut resolved = true;
        for part in path.split('.') {
            match get(current, part) {
                Some(next) => current = next,
                None => {
                    resolved = false;
                    break;
                }
            }
        }
        if !resolved {
            continue;
        }
        match current {
            Value::Null => continue,
            Value::String(text) if text.is_empty() => continue,
            _ => return Some(current),
        }
    }
    None
}

/// Best-effort conversion of `value` to an integer.
///
/// Booleans map to 0/1, finite floats truncate toward zero, strings accept
/// decimal or `0x`-prefixed hex, falling back to a float parse. `NaN` and
/// infinities yield `None`.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Bool(flag) => Some(i64::from(*flag)),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(int)
            } else if let Some(uint) = number.as_u64() {
                i64::try_from(uint).ok()
            } else {
                number
                    .as_f64()
                    .filter(|float| float.is_finite())
                    .map(|float| float.trunc() as i64)
            }
        }
        Value::String(text) => coerce_int_str(text),
        _ => None,
    }
}

fn coerce_int_str(text: &str) -> Option<i64> {
    let stripped = text.trim();
    if stripped.is_empty() {
        return None;
    }
    let lowered = stripped.to_ascii_lowercase();
    if let Some(body) = lowered.strip_prefix("0x") {
        return i64::from_str_radix(body, 16).ok();
    }
    if let Ok(int) = stripped.parse::<i64>() {
        return Some(int);
    }
    stripped
        .parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .map(|float| float.trunc() as i64)
}

/// Best-effort conversion of `value` to a finite float.
pub fn coerce_float(value: Option<&Value>) -> Option<f64> {
    let result = match value? {
        Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let stripped = text.trim();
            if stripped.is_empty() {
                return None;
            }
            stripped.parse::<f64>().ok()
        }
        _ => None,
    };
    result.filter(|float| float.is_finite())
}

/// Converts a unix timestamp into an ISO-8601 string in UTC.
pub fn iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|instant| instant.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Merges two JSON trees recursively, entries from `extra` overlaying `base`.
pub fn merge_values(base: Option<&Value>, extra: &Value) -> Value {
    let mut merged = match base {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(extra_map) = extra {
        for (key, value) in extra_map {
            match value {
                Value::Object(_) => {
                    let existing = merged.get(key).cloned();
                    merged.insert(key.clone(), merge_values(existing.as_ref(), value));
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    } else if let Some(base_value) = base {
        if !matches!(base_value, Value::Object(_)) {
            return base_value.clone();
        }
    }
    Value::Object(merged)
}

/// Returns raw payload bytes from a decoded section when available.
///
/// Payloads appear either as a base64 string or as an object carrying the
/// bytes under `__bytes_b64__`/`bytes`.
pub fn extract_payload_bytes(decoded: &Value) -> Option<Vec<u8>> {
    let payload = get(decoded, "payload")?;
    let encoded = match payload {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => map
            .get("__bytes_b64__")
            .or_else(|| map.get("bytes"))
            .and_then(Value::as_str),
        _ => None,
    }?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

/// Encodes raw payload bytes for JSON transport; empty payloads yield `None`.
pub fn base64_payload(payload_bytes: Option<&[u8]>) -> Option<String> {
    let bytes = payload_bytes?;
    if bytes.is_empty() {
        return None;
    }
    Some(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Returns `true` when `value` represents an encrypted payload.
///
/// Strings other than `""`, `"0"`, `"false"` and `"no"` count as truthy.
pub fn is_encrypted_flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(text)) => {
            let normalized = text.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "" | "0" | "false" | "no")
        }
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_prefers_non_empty_paths() {
        let value = json!({"a": "", "b": {"c": null}, "d": "hit"});
        let found = first(&value, &["a", "b.c", "d"]);
        assert_eq!(found, Some(&json!("hit")));
    }

    #[test]
    fn first_traverses_nested_paths() {
        let value = json!({"raw": {"latitude_i": 525598720}});
        assert_eq!(
            first(&value, &["latitudeI", "raw.latitude_i"]),
            Some(&json!(525598720))
        );
    }

    #[test]
    fn coerce_int_handles_mixed_inputs() {
        assert_eq!(coerce_int(Some(&json!(true))), Some(1));
        assert_eq!(coerce_int(Some(&json!(7.9))), Some(7));
        assert_eq!(coerce_int(Some(&json!("0x1f"))), Some(31));
        assert_eq!(coerce_int(Some(&json!("  42 "))), Some(42));
        assert_eq!(coerce_int(Some(&json!("3.7"))), Some(3));
        assert_eq!(coerce_int(Some(&json!(""))), None);
        assert_eq!(coerce_int(Some(&json!("bogus"))), None);
        assert_eq!(coerce_int(Some(&json!(f64::NAN))), None);
        assert_eq!(coerce_int(None), None);
    }

    #[test]
    fn coerce_float_rejects_non_finite() {
        assert_eq!(coerce_float(Some(&json!("2.5"))), Some(2.5));
        assert_eq!(coerce_float(Some(&json!(false))), Some(0.0));
        assert_eq!(coerce_float(Some(&json!("inf"))), None);
        assert_eq!(coerce_float(Some(&json!("nan"))), None);
    }

    #[test]
    fn iso_formats_utc_seconds() {
        assert_eq!(iso(1_700_000_000), "2023-11-14T22:13:20Z");
        assert_eq!(iso(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn merge_values_overlays_nested_maps() {
        let base = json!({"user": {"id": "!00000001", "shortName": "a"}});
        let extra = json!({"user": {"shortName": "b"}, "snr": 3.5});
        let merged = merge_values(Some(&base), &extra);
        assert_eq!(merged["user"]["id"], "!00000001");
        assert_eq!(merged["user"]["shortName"], "b");
        assert_eq!(merged["snr"], 3.5);
    }

    #[test]
    fn payload_bytes_roundtrip() {
        let decoded = json!({"payload": "aGk="});
        assert_eq!(extract_payload_bytes(&decoded), Some(b"hi".to_vec()));
        let wrapped = json!({"payload": {"__bytes_b64__": "aGk="}});
        assert_eq!(extract_payload_bytes(&wrapped), Some(b"hi".to_vec()));
        assert_eq!(base64_payload(Some(b"hi")), Some("aGk=".to_string()));
        assert_eq!(base64_payload(Some(b"")), None);
    }

    #[test]
    fn encrypted_flag_truthiness() {
        assert!(is_encrypted_flag(Some(&json!(true))));
        assert!(is_encrypted_flag(Some(&json!("yes"))));
        assert!(!is_encrypted_flag(Some(&json!("no"))));
        assert!(!is_encrypted_flag(Some(&json!("0"))));
        assert!(!is_encrypted_flag(Some(&json!(""))));
        assert!(!is_encrypted_flag(Some(&json!(0))));
        assert!(is_encrypted_flag(Some(&json!({"psk": 1}))));
        assert!(!is_encrypted_flag(None));
    }
}
