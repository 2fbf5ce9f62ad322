//! Canonical serialisation and content hashing.
//!
//! Two pieces of content that differ only in object key order must hash to
//! the same digest, because the content hash is the sole deduplication key.
//! Object keys are therefore sorted recursively before hashing, independent
//! of how `serde_json` orders its maps.

use serde_json::Value;

/// Serialise `value` as compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// BLAKE3 hex digest of the canonical serialisation of `value`.
pub fn content_hash(value: &Value) -> String {
    blake3::hash(canonical_json(value).as_bytes())
        .to_hex()
        .to_string()
}

/// Pretty-printed form with sorted keys, one scalar per line.
///
/// Line-oriented diffs of two versions of the same content compare this form.
/// `serde_json` maps are `BTreeMap`s without `preserve_order`, so keys
/// serialise sorted already.
pub fn canonical_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| canonical_json(value))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_keys() {
        let value = json!({"z": 1, "a": {"y": true, "b": null}});
        assert_eq!(canonical_json(&value), r#"{"a":{"b":null,"y":true},"z":1}"#);
    }

    #[test]
    fn preserves_array_order() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn escapes_string_keys() {
        let value = json!({"quote\"key": "v"});
        assert_eq!(canonical_json(&value), r#"{"quote\"key":"v"}"#);
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let value = json!({"title": "Submarine acquisition"});
        let h1 = content_hash(&value);
        let h2 = content_hash(&value);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pretty_form_is_line_per_field_and_key_sorted() {
        let value = json!({"b": 2, "a": [1, 2]});
        let pretty = canonical_pretty(&value);
        assert!(pretty.find("\"a\"").expect("a") < pretty.find("\"b\"").expect("b"));
        assert!(pretty.lines().count() > 3);

        let nested = canonical_pretty(&json!({"outer": {"z": 1, "m": 2, "a": 3}}));
        let keys: Vec<usize> = ["\"a\"", "\"m\"", "\"z\""]
            .iter()
            .map(|k| nested.find(k).expect("key present"))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "{nested}");
    }

    #[test]
    fn different_scalars_hash_differently() {
        assert_ne!(content_hash(&json!("1")), content_hash(&json!(1)));
    }
}
