//! Values schema validation
//!
//! Checks user values against the OpenAPI v3 subset packages use for their
//! values schemas: `type`, `nullable`, `properties`, `required`,
//! `additionalProperties`, `items`, `enum`, `minimum`, `maximum`,
//! `minLength`, `maxLength`, `pattern`, `minItems` and `maxItems`. Other
//! keywords are accepted and ignored. Every violation is collected, each
//! tagged with the JSON path of the offending value.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON path of the offending value, rooted at `$`
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `instance` against `schema`, returning every violation found
pub fn validate(schema: &Value, instance: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check(schema, instance, "$", &mut violations);
    violations
}

fn check(schema: &Value, instance: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };
    if instance.is_null() && schema.get("nullable").and_then(Value::as_bool) == Some(true) {
        return;
    }

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, instance) {
            let message = format!("expected {}, found {}", expected, kind_of(instance));
            out.push(violation(path, message));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            out.push(violation(path, format!("{} is not one of the allowed values", instance)));
        }
    }

    match instance {
        Value::Object(map) => check_object(schema, map, path, out),
        Value::Array(items) => check_array(schema, items, path, out),
        Value::String(s) => check_string(schema, s, path, out),
        Value::Number(n) => {
            if let Some(value) = n.as_f64() {
                check_number(schema, value, path, out);
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

fn violation(path: &str, message: String) -> Violation {
    Violation {
        path: path.to_string(),
        message,
    }
}

fn check_object(
    schema: &Map<String, Value>,
    map: &Map<String, Value>,
    path: &str,
    out: &mut Vec<Violation>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                out.push(violation(path, format!("missing required property '{}'", name)));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional = schema.get("additionalProperties");

    for (name, value) in map {
        let child = format!("{}.{}", path, name);
        match (properties.and_then(|p| p.get(name)), additional) {
            (Some(property), _) => check(property, value, &child, out),
            (None, Some(Value::Bool(false))) => out.push(Violation {
                path: child,
                message: "additional property is not allowed".into(),
            }),
            (None, Some(extra @ Value::Object(_))) => check(extra, value, &child, out),
            (None, _) => {}
        }
    }
}

fn check_array(schema: &Map<String, Value>, items: &[Value], path: &str, out: &mut Vec<Violation>) {
    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if len < min {
            out.push(violation(path, format!("expected at least {} items, found {}", min, len)));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if len > max {
            out.push(violation(path, format!("expected at most {} items, found {}", max, len)));
        }
    }

    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{}[{}]", path, i), out);
        }
    }
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            let message = format!("expected at least {} characters, found {}", min, len);
            out.push(violation(path, message));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            let message = format!("expected at most {} characters, found {}", max, len);
            out.push(violation(path, message));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(s) => {}
            Ok(_) => out.push(violation(path, format!("does not match pattern '{}'", pattern))),
            Err(e) => {
                let message = format!("schema pattern '{}' is invalid: {}", pattern, e);
                out.push(violation(path, message));
            }
        }
    }
}

fn check_number(schema: &Map<String, Value>, value: f64, path: &str, out: &mut Vec<Violation>) {
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if value < min {
            out.push(violation(path, format!("{} is less than the minimum of {}", value, min)));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if value > max {
            out.push(violation(path, format!("{} is greater than the maximum of {}", value, max)));
        }
    }
}

fn type_matches(expected: &str, instance: &Value) -> bool {
    match expected {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => {
            instance.is_i64()
                || instance.is_u64()
                || instance.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        // Unknown types do not constrain
        _ => true,
    }
}

fn kind_of(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nginx_schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["replicas"],
            "properties": {
                "replicas": {"type": "integer", "minimum": 1, "maximum": 10},
                "service_type": {"type": "string", "enum": ["ClusterIP", "NodePort"]},
                "hostname": {"type": "string", "pattern": "^[a-z0-9.-]+$", "maxLength": 20},
                "tls": {"type": "object", "nullable": true},
                "ports": {
                    "type": "array",
                    "minItems": 1,
                    "items": {"type": "integer"}
                },
                "annotations": {
                    "type": "object",
                    "additionalProperties": {"type": "string"}
                }
            }
        })
    }

    fn paths(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.path.as_str()).collect()
    }

    #[test]
    fn test_valid_values_pass() {
        let values = json!({
            "replicas": 3,
            "service_type": "NodePort",
            "hostname": "web.example",
            "tls": null,
            "ports": [80, 443],
            "annotations": {"team": "web"}
        });
        assert!(validate(&nginx_schema(), &values).is_empty());
    }

    #[test]
    fn test_every_violation_is_reported_with_its_path() {
        let values = json!({
            "replicas": "three",
            "service_type": "LoadBalancer",
            "hostname": "Not_Valid",
            "ports": [80, "https"],
            "annotations": {"team": 7},
            "colour": "blue"
        });
        let violations = validate(&nginx_schema(), &values);
        let mut got = paths(&violations);
        got.sort();
        assert_eq!(
            got,
            vec![
                "$.annotations.team",
                "$.colour",
                "$.hostname",
                "$.ports[1]",
                "$.replicas",
                "$.service_type",
            ]
        );
    }

    #[test]
    fn test_missing_required_property() {
        let violations = validate(&nginx_schema(), &json!({}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$");
        assert!(violations[0].message.contains("replicas"));
    }

    #[test]
    fn test_numeric_and_length_bounds() {
        let violations = validate(
            &nginx_schema(),
            &json!({"replicas": 11, "hostname": "a-very-long-hostname-indeed", "ports": []}),
        );
        let mut got = paths(&violations);
        got.sort();
        assert_eq!(got, vec!["$.hostname", "$.ports", "$.replicas"]);
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        assert!(validate(&json!({"type": "integer"}), &json!(2.0)).is_empty());
        assert_eq!(validate(&json!({"type": "integer"}), &json!(2.5)).len(), 1);
    }

    #[test]
    fn test_unknown_keywords_and_empty_schema_are_permissive() {
        assert!(validate(&json!({}), &json!({"anything": [1, 2]})).is_empty());
        let schema = json!({"x-kubernetes-preserve-unknown-fields": true});
        assert!(validate(&schema, &json!(1)).is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let violations = validate(&json!({"type": "string", "pattern": "("}), &json!("x"));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("invalid"));
    }
}
