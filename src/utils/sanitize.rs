use serde_json::Value;
use std::collections::HashMap;

/// Sanitizes sensitive fields in JSON payloads for logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

/// Same masking for a form-encoded field bag, e.g. a gateway callback.
pub fn sanitize_form(fields: &HashMap<String, String>) -> Value {
    let map = fields
        .iter()
        .map(|(key, val)| (key.clone(), Value::String(val.clone())))
        .collect::<serde_json::Map<_, _>>();
    sanitize_json(&Value::Object(map))
}

/// Masks a token for display, keeping only the last four characters.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "token"
            | "input_token"
            | "result_token"
            | "stored_token"
            | "auth_code"
            | "masked_account"
            | "account"
            | "password"
            | "secret"
            | "shared_secret"
            | "api_key"
            | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let visible: String = chars[..4].iter().collect();
            let end: String = chars[chars.len() - 4..].iter().collect();
            Value::String(format!("{}****{}", visible, end))
        }
        _ => Value::String("****".to_string()),
    }
}
