//! Masks or strips well-known secret fields out of a nested JSON payload
//! before it reaches a log line or a stored record.
//!
//! The deny-list is a plain, case-insensitive set of field names. It ships
//! with sane defaults and can be extended at runtime — useful when a
//! particular handler introduces its own secret-shaped field name.

use std::collections::HashSet;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde_json::Value;

const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "apikey",
    "secret",
    "cvv",
    "pin",
    "ssn",
    "credit_card",
    "bearer_token",
    "private_key",
    "salt",
    "client_secret",
    "refresh_token",
    "access_token",
];

static SENSITIVE_FIELDS: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| {
    RwLock::new(
        DEFAULT_SENSITIVE_FIELDS
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
    )
});

/// Whether `name` is on the sensitive-field deny-list (case-insensitive).
pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_FIELDS
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .contains(&name.to_ascii_lowercase())
}

/// Adds `name` to the deny-list for the remaining lifetime of the process.
pub fn add(name: impl AsRef<str>) {
    SENSITIVE_FIELDS
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(name.as_ref().to_ascii_lowercase());
}

/// Removes `name` from the deny-list.
pub fn remove(name: impl AsRef<str>) {
    SENSITIVE_FIELDS
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&name.as_ref().to_ascii_lowercase());
}

/// Recursively replaces sensitive fields with a partially-obscured
/// placeholder, leaving everything else untouched.
pub fn mask(data: &Value) -> Value {
    walk(data, mask_value)
}

/// Recursively omits sensitive fields entirely.
pub fn strip_for_log(data: &Value) -> Value {
    walk(data, |_| None)
}

fn walk(value: &Value, on_sensitive: impl Fn(&Value) -> Option<Value> + Copy) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive(key) {
                    if let Some(replacement) = on_sensitive(val) {
                        out.insert(key.clone(), replacement);
                    }
                } else {
                    out.insert(key.clone(), walk(val, on_sensitive));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| walk(v, on_sensitive)).collect()),
        other => other.clone(),
    }
}

fn mask_value(value: &Value) -> Option<Value> {
    Some(match value {
        Value::String(s) => Value::String(mask_string(s)),
        Value::Null | Value::Number(_) | Value::Bool(_) => Value::String("***".to_string()),
        Value::Object(_) | Value::Array(_) => Value::String("***".to_string()),
    })
}

fn mask_string(s: &str) -> String {
    let len = s.chars().count();
    if len <= 4 {
        "*".repeat(len.max(1))
    } else {
        let chars: Vec<char> = s.chars().collect();
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[len - 2..].iter().collect();
        format!("{head}{}{tail}", "*".repeat(len - 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_short_strings_fully() {
        assert_eq!(mask_string("ab"), "**");
        assert_eq!(mask_string("abcd"), "****");
    }

    #[test]
    fn masks_long_strings_keeping_ends() {
        assert_eq!(mask_string("abcdefgh"), "ab****gh");
    }

    #[test]
    fn mask_recurses_into_nested_objects_and_arrays() {
        let data = json!({
            "user": "alice",
            "credentials": {
                "password": "hunter2hunter2",
                "api_key": "ak-1234567890",
            },
            "items": [{"token": "short"}, {"name": "ok"}],
        });
        let masked = mask(&data);
        assert_eq!(masked["user"], json!("alice"));
        assert_eq!(masked["credentials"]["password"], json!("hu**********r2"));
        assert_eq!(masked["items"][0]["token"], json!("*****"));
        assert_eq!(masked["items"][1]["name"], json!("ok"));
    }

    #[test]
    fn strip_for_log_omits_sensitive_fields() {
        let data = json!({"user": "alice", "password": "x", "nested": {"secret": "y", "ok": 1}});
        let stripped = strip_for_log(&data);
        assert!(stripped.get("password").is_none());
        assert!(stripped["nested"].get("secret").is_none());
        assert_eq!(stripped["nested"]["ok"], json!(1));
    }

    #[test]
    fn is_sensitive_is_case_insensitive() {
        assert!(is_sensitive("Password"));
        assert!(is_sensitive("API_KEY"));
        assert!(!is_sensitive("username"));
    }

    #[test]
    fn add_and_remove_extend_the_deny_list_at_runtime() {
        assert!(!is_sensitive("internal_flag"));
        add("internal_flag");
        assert!(is_sensitive("internal_flag"));
        remove("internal_flag");
        assert!(!is_sensitive("internal_flag"));
    }

    #[test]
    fn numerics_and_nulls_mask_to_fixed_placeholder() {
        let data = json!({"pin": 1234, "ssn": null});
        let masked = mask(&data);
        assert_eq!(masked["pin"], json!("***"));
        assert_eq!(masked["ssn"], json!("***"));
    }
}
