//! Canonical node identifier handling.
//!
//! Meshtastic nodes are addressed by a 32-bit number rendered as `!xxxxxxxx`.
//! Packets reference nodes inconsistently (integers, bare hex, `0x` prefixes,
//! byte strings), so everything funnels through [`canonical_node_id`] once at
//! the edge and the canonical form is never re-derived downstream.

use serde_json::Value;

/// Converts a node reference into the canonical `!xxxxxxxx` format.
///
/// Group aliases starting with `^` pass through unchanged. Returns `None`
/// for negative numbers and unparsable strings.
pub fn canonical_node_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(number) => {
            let num = if let Some(int) = number.as_i64() {
                int
            } else if let Some(uint) = number.as_u64() {
                i64::try_from(uint).ok()?
            } else {
                let float = number.as_f64()?;
                if !float.is_finite() {
                    return None;
                }
                float.trunc() as i64
            };
            if num < 0 {
                return None;
            }
            Some(format!("!{:08x}", (num as u64) & 0xFFFF_FFFF))
        }
        Value::String(text) => canonical_node_id_str(text),
        _ => None,
    }
}

/// String-only variant of [`canonical_node_id`].
pub fn canonical_node_id_str(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('^') {
        return Some(trimmed.to_string());
    }

    let body = if let Some(rest) = trimmed.strip_prefix('!') {
        rest
    } else if let Some(rest) = strip_hex_prefix(trimmed) {
        rest
    } else if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let num = trimmed.parse::<u64>().ok()?;
        return Some(format!("!{:08x}", num & 0xFFFF_FFFF));
    } else {
        trimmed
    };

    if body.is_empty() {
        return None;
    }
    let num = u64::from_str_radix(body, 16).ok()?;
    Some(format!("!{:08x}", num & 0xFFFF_FFFF))
}

/// Extracts the numeric node number from an identifier.
///
/// Unlike [`canonical_node_id`] the value is returned unmasked. Strings are
/// parsed as hex first, falling back to decimal.
pub fn node_num_from_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => {
            let num = if let Some(int) = number.as_i64() {
                int
            } else if let Some(uint) = number.as_u64() {
                i64::try_from(uint).ok()?
            } else {
                let float = number.as_f64()?;
                if !float.is_finite() {
                    return None;
                }
                float.trunc() as i64
            };
            (num >= 0).then_some(num)
        }
        Value::String(text) => {
            let mut trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Some(rest) = trimmed.strip_prefix('!') {
                trimmed = rest;
            }
            if let Some(rest) = strip_hex_prefix(trimmed) {
                trimmed = rest;
            }
            i64::from_str_radix(trimmed, 16)
                .ok()
                .or_else(|| trimmed.parse::<i64>().ok())
        }
        _ => None,
    }
}

fn strip_hex_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
}

/// Returns `true` when `value` resembles a node identifier string.
///
/// Bare decimal strings are excluded: a field labelled `id` holding `"1234"`
/// is far more likely a packet id than a node reference.
pub fn is_nodeish_identifier(value: &Value) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let mut trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with('^') {
        return true;
    }
    if let Some(rest) = trimmed.strip_prefix('!') {
        trimmed = rest;
    } else if let Some(rest) = strip_hex_prefix(trimmed) {
        trimmed = rest;
    } else if !trimmed.bytes().any(|b| matches!(b, b'a'..=b'f' | b'A'..=b'F')) {
        return false;
    }
    !trimmed.is_empty()
        && trimmed.len() <= 8
        && trimmed.bytes().all(|b| b.is_ascii_hexdigit())
}

const NODE_REF_KEYS: &[&str] = &[
    "fromId", "from_id", "from", "nodeId", "node_id", "nodeNum", "node_num", "num", "userId",
    "user_id",
];

const USER_REF_KEYS: &[&str] = &["userId", "user_id", "num", "nodeNum", "node_num"];

/// Scans `value` for the most plausible node identifier.
///
/// Well-known reference keys are tried first, then an `id` entry that looks
/// node-shaped, then the `user`, `decoded`, `payload` and wrapper sections,
/// and finally every nested value. Used when synthesising identifiers for
/// malformed nodeinfo frames and when extracting the host identity.
pub fn candidate_node_id(value: &Value) -> Option<String> {
    let map = value.as_object()?;

    for key in NODE_REF_KEYS {
        if let Some(found) = canonical_node_id(map.get(*key)) {
            return Some(found);
        }
    }

    if let Some(id_value) = map.get("id") {
        if is_nodeish_identifier(id_value) {
            if let Some(found) = canonical_node_id(Some(id_value)) {
                return Some(found);
            }
        }
    }

    if let Some(Value::Object(user_map)) = map.get("user") {
        for key in USER_REF_KEYS {
            if let Some(found) = canonical_node_id(user_map.get(*key)) {
                return Some(found);
            }
        }
        if let Some(id_value) = user_map.get("id") {
            if is_nodeish_identifier(id_value) {
                if let Some(found) = canonical_node_id(Some(id_value)) {
                    return Some(found);
                }
            }
        }
    }

    for key in ["decoded", "payload", "packet", "meta", "info"] {
        if let Some(section) = map.get(key).filter(|v| v.is_object()) {
            if let Some(found) = candidate_node_id(section) {
                return Some(found);
            }
        }
    }

    for nested in map.values() {
        match nested {
            Value::Array(items) => {
                for item in items {
                    if item.is_object() {
                        if let Some(found) = candidate_node_id(item) {
                            return Some(found);
                        }
                    }
                }
            }
            Value::Object(_) => {
                if let Some(found) = candidate_node_id(nested) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_forms_from_numbers() {
        assert_eq!(
            canonical_node_id(Some(&json!(305419896))),
            Some("!12345678".to_string())
        );
        assert_eq!(
            canonical_node_id(Some(&json!(0))),
            Some("!00000000".to_string())
        );
        // 32-bit wraparound keeps only the low word.
        assert_eq!(
            canonical_node_id(Some(&json!(0x1_0000_0001u64))),
            Some("!00000001".to_string())
        );
        assert_eq!(canonical_node_id(Some(&json!(-5))), None);
    }

    #[test]
    fn canonical_forms_from_strings() {
        assert_eq!(
            canonical_node_id_str("!ABCD1234"),
            Some("!abcd1234".to_string())
        );
        assert_eq!(
            canonical_node_id_str("0xABCD1234"),
            Some("!abcd1234".to_string())
        );
        assert_eq!(
            canonical_node_id_str("abcd1234"),
            Some("!abcd1234".to_string())
        );
        assert_eq!(
            canonical_node_id_str("305419896"),
            Some("!12345678".to_string())
        );
        assert_eq!(canonical_node_id_str("^all"), Some("^all".to_string()));
        assert_eq!(canonical_node_id_str("  "), None);
        assert_eq!(canonical_node_id_str("!"), None);
        assert_eq!(canonical_node_id_str("0x"), None);
        assert_eq!(canonical_node_id_str("not-hex"), None);
    }

    #[test]
    fn node_num_is_unmasked() {
        assert_eq!(node_num_from_id(Some(&json!("!abcd1234"))), Some(0xabcd1234));
        assert_eq!(
            node_num_from_id(Some(&json!(0x1_0000_0001u64))),
            Some(0x1_0000_0001)
        );
        // Hex parse wins over decimal for ambiguous digit strings.
        assert_eq!(node_num_from_id(Some(&json!("10"))), Some(16));
        assert_eq!(node_num_from_id(Some(&json!("^all"))), None);
    }

    #[test]
    fn nodeish_identifier_rules() {
        assert!(is_nodeish_identifier(&json!("!abcd1234")));
        assert!(is_nodeish_identifier(&json!("0xABCD1234")));
        assert!(is_nodeish_identifier(&json!("^all")));
        assert!(is_nodeish_identifier(&json!("deadbeef")));
        // Bare decimals labelled "id" are packet ids, not node ids.
        assert!(!is_nodeish_identifier(&json!("123456")));
        assert!(!is_nodeish_identifier(&json!(42)));
    }

    #[test]
    fn candidate_id_scans_nested_sections() {
        let packet = json!({
            "decoded": {"user": {"id": "!abcd1234"}},
        });
        assert_eq!(candidate_node_id(&packet), Some("!abcd1234".to_string()));

        let info = json!({"myNodeNum": 305419896});
        assert_eq!(candidate_node_id(&info), None);
        let with_from = json!({"from": 305419896});
        assert_eq!(candidate_node_id(&with_from), Some("!12345678".to_string()));
    }
}
