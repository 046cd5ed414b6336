//! Canonical JSON form used for change detection.
//!
//! Two values are considered equal when their canonical serializations are
//! byte-identical: object keys are emitted in sorted order regardless of how
//! the provider ordered them, and floats with an integral value are written as
//! integers so that `1` and `1.0` compare equal.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

// Integral floats beyond this magnitude are not exactly representable as i64
// round-trips, so they keep their float form.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Serialize `value` into its canonical string form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// SHA-256 hex digest of the canonical form of `value`.
pub fn content_hash(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    hex::encode(digest)
}

/// Structural equality over canonical forms.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    canonical_json(a) == canonical_json(b)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
        return;
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
        return;
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            let _ = write!(out, "{}", f as i64);
        }
        _ => out.push_str(&n.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's string escaping is already deterministic.
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}
