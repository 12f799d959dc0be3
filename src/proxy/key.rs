//! Deterministic request keys for the cache and the limiter.

use std::fmt;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::backend::InvokeOptions;

/// Options that never change what the backend produces.
const NON_SEMANTIC_OPTIONS: &[&str] = &["metadata", "request_id", "stream", "timeout", "user"];

/// SHA-256 over the normalized prompt and the canonical option set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn derive(prompt: &str, options: &InvokeOptions) -> Self {
        let mut canonical = String::new();
        canonical.push('{');
        let mut first = true;
        for (key, value) in options.iter() {
            if NON_SEMANTIC_OPTIONS.contains(&key.as_str()) {
                continue;
            }
            if !first {
                canonical.push(',');
            }
            first = false;
            write_json_string(key, &mut canonical);
            canonical.push(':');
            write_canonical(value, &mut canonical);
        }
        canonical.push('}');

        let mut hasher = Sha256::new();
        hasher.update(normalize_prompt(prompt).as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim surrounding whitespace and unify line endings.
fn normalize_prompt(prompt: &str) -> String {
    prompt.trim().replace("\r\n", "\n")
}

/// JSON rendering with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(value, out);
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
        Value::String(s) => write_json_string(s, out),
        Value::Number(n) => write_number(n, out),
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Integral values render alike whether they arrived as `1` or `1.0`.
fn write_number(n: &Number, out: &mut String) {
    // 2^53, the largest range where every integer is an exact f64.
    const EXACT_INTEGERS: f64 = 9_007_199_254_740_992.0;
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < EXACT_INTEGERS => {
            out.push_str(&(f as i64).to_string())
        }
        _ => out.push_str(&n.to_string()),
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
