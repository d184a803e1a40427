//! Canonicalization contract for integrity hashing: stable key sort,
//! numbers without trailing zeros, ISO-8601 UTC timestamps. The digest
//! must be reproducible by any client or server re-canonicalizing the
//! same fields, so every detail here is load-bearing, not incidental.

use serde_json::Value;

/// Canonicalize a JSON value into its byte representation for hashing:
/// object keys sorted lexicographically at every level, arrays preserved
/// in order, numbers printed via `serde_json`'s shortest round-trip
/// representation (no trailing zeros), strings unescaped-minimal per
/// `serde_json`'s default string encoding.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string always serializes"))
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
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string always serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Render a millisecond epoch timestamp as ISO-8601 UTC, the form the
/// canonicalization contract requires for any timestamp field embedded in
/// a hashed payload.
pub fn iso8601_utc(millis: i64) -> String {
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap());
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_level() {
        let a = canonicalize(&json!({"b": 1, "a": {"d": 2, "c": 3}}));
        assert_eq!(a, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn is_stable_regardless_of_input_order() {
        let a = canonicalize(&json!({"z": 1, "a": 2}));
        let b = canonicalize(&json!({"a": 2, "z": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn iso8601_round_trips_millis() {
        let s = iso8601_utc(1_700_000_000_123);
        assert!(s.starts_with("2023-11-14T22:13:20.123"));
    }
}
