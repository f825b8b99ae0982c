//! Argument validation against tool input schemas.
//!
//! Supports the JSON Schema subset used by the registered tools: `type`,
//! `properties`, `required`, `items`, `enum`, `minimum`, `maximum` and
//! `minLength`. Properties not described by the schema are accepted.

use serde_json::Value;

/// Validates `value` against `schema`.
///
/// # Errors
///
/// Returns a message naming the first offending field.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "arguments")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{path}: expected {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: must be one of {}", Value::Array(allowed.clone())));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: must be >= {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: must be <= {max}"));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                return Err(format!("{path}: must be at least {min} characters"));
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(format!("{path}: missing required field '{name}'"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property_schema) in properties {
                if let Some(field) = object.get(key) {
                    validate_at(property_schema, field, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for (i, item) in array.iter().enumerate() {
            validate_at(items, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 },
                "min_score": { "type": "number", "minimum": 0, "maximum": 1 },
                "tags": { "type": "array", "items": { "type": "string" } },
                "mode": { "type": "string", "enum": ["fast", "full"] }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({ "query": "docker", "limit": 5, "min_score": 0.5, "tags": ["a"] });
        assert!(validate(&schema(), &args).is_ok());
    }

    #[test]
    fn accepts_unknown_properties() {
        assert!(validate(&schema(), &json!({ "query": "x", "extra": true })).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate(&schema(), &json!({ "limit": 5 })).unwrap_err();
        assert!(err.contains("missing required field 'query'"), "{err}");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate(&schema(), &json!({ "query": 42 })).unwrap_err();
        assert_eq!(err, "arguments.query: expected string, got number");
    }

    #[test]
    fn integer_rejects_fractions() {
        assert!(validate(&schema(), &json!({ "query": "x", "limit": 2.5 })).is_err());
    }

    #[test]
    fn enforces_bounds() {
        assert!(validate(&schema(), &json!({ "query": "x", "limit": 0 })).is_err());
        assert!(validate(&schema(), &json!({ "query": "x", "limit": 51 })).is_err());
        assert!(validate(&schema(), &json!({ "query": "x", "min_score": 1.5 })).is_err());
        assert!(validate(&schema(), &json!({ "query": "" })).is_err());
    }

    #[test]
    fn checks_array_items_and_enums() {
        let err = validate(&schema(), &json!({ "query": "x", "tags": ["a", 1] })).unwrap_err();
        assert!(err.starts_with("arguments.tags[1]"), "{err}");
        assert!(validate(&schema(), &json!({ "query": "x", "mode": "slow" })).is_err());
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = validate(&schema(), &json!("docker")).unwrap_err();
        assert!(err.contains("expected object"));
    }
}
