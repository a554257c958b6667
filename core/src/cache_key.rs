use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic cache key for a parameter bag under a logical namespace.
///
/// Two bags that are structurally equal after (a) recursively sorting object
/// keys and (b) omitting null members produce the same key; any differing
/// field produces a different key. Arrays are order-significant — callers
/// that want set semantics sort before calling.
///
/// The canonical rendering is SHA-256 hashed so keys stay short and safe for
/// any backend regardless of parameter size or content.
pub fn canonical_key(namespace: &str, params: &Value) -> String {
    let mut rendering = String::new();
    write_canonical(&mut rendering, params);
    let digest = Sha256::digest(rendering.as_bytes());
    format!("cache:{namespace}:{}", hex::encode(digest))
}

/// The canonical rendering itself — exposed for diagnostics and tests.
/// Object keys sorted, nulls omitted, strings via serde_json escaping,
/// numbers via their serde_json display form.
pub fn canonical_rendering(params: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, params);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            // serde_json's escaping keeps `"a,b"` distinct from `"a","b"`.
            let _ = write!(out, "{}", Value::String(s.clone()));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String((*key).clone()));
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"destination": "Kyoto", "guests": 2, "max_price": 300});
        let b = json!({"max_price": 300, "guests": 2, "destination": "Kyoto"});
        assert_eq!(canonical_key("lodging", &a), canonical_key("lodging", &b));
    }

    #[test]
    fn absent_and_null_optionals_are_equivalent() {
        let explicit_null = json!({"query": "ramen", "category": null});
        let omitted = json!({"query": "ramen"});
        assert_eq!(
            canonical_key("search", &explicit_null),
            canonical_key("search", &omitted)
        );
    }

    #[test]
    fn any_differing_field_changes_the_key() {
        let base = json!({"query": "ramen", "max_results": 5});
        let different_value = json!({"query": "ramen", "max_results": 6});
        let extra_field = json!({"query": "ramen", "max_results": 5, "lang": "ja"});
        assert_ne!(
            canonical_key("search", &base),
            canonical_key("search", &different_value)
        );
        assert_ne!(
            canonical_key("search", &base),
            canonical_key("search", &extra_field)
        );
    }

    #[test]
    fn namespaces_partition_the_key_space() {
        let params = json!({"query": "ramen"});
        assert_ne!(
            canonical_key("search", &params),
            canonical_key("poi", &params)
        );
    }

    #[test]
    fn arrays_stay_order_significant() {
        let ab = json!({"destinations": ["Osaka", "Nara"]});
        let ba = json!({"destinations": ["Nara", "Osaka"]});
        assert_ne!(canonical_key("search", &ab), canonical_key("search", &ba));
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let a = json!({"filters": {"beds": 2, "area": "Gion"}});
        let b = json!({"filters": {"area": "Gion", "beds": 2}});
        assert_eq!(
            canonical_rendering(&a),
            canonical_rendering(&b)
        );
    }

    #[test]
    fn rendering_escapes_string_boundaries() {
        let smuggled = json!({"a": "1\",\"b\":\"2"});
        let honest = json!({"a": "1", "b": "2"});
        assert_ne!(
            canonical_rendering(&smuggled),
            canonical_rendering(&honest)
        );
    }
}
