//! JSON-Schema (draft 4 subset) validation of request documents.

use crate::error::{ApiError, ValidationIssue};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Validates JSON instances against JSON-Schema documents.
pub trait SchemaValidator: Send + Sync {
    /// Every failing keyword, located by instance path.
    fn iter_errors(&self, instance: &Value, schema: &Value) -> Vec<ValidationIssue>;

    fn validate(&self, instance: &Value, schema: &Value) -> Result<(), ApiError> {
        let errors = self.iter_errors(instance, schema);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(errors))
        }
    }

    fn is_valid(&self, instance: &Value, schema: &Value) -> bool {
        self.iter_errors(instance, schema).is_empty()
    }
}

/// Draft 4 keywords used by generated schemas. `$ref` resolves `#` and
/// `#/...` pointers against the root document; other references are accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct Draft4Validator;

impl SchemaValidator for Draft4Validator {
    fn iter_errors(&self, instance: &Value, schema: &Value) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        check(schema, schema, instance, &mut path, &mut out);
        out
    }
}

fn issue(out: &mut Vec<ValidationIssue>, path: &[Value], schema: &Map<String, Value>, keyword: &str, message: String) {
    let value = schema.get(keyword).cloned().unwrap_or(Value::Null);
    out.push(ValidationIssue::new(path.to_vec(), keyword, value, message));
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    match reference {
        "#" => Some(root),
        r if r.starts_with("#/") => root.pointer(&r[1..]),
        _ => None,
    }
}

/// Compiled `pattern`/`patternProperties` expressions, shared across validations.
fn compiled(pattern: &str) -> Option<Regex> {
    static CACHE: OnceLock<Mutex<HashMap<String, Option<Regex>>>> = OnceLock::new();
    let Ok(mut cache) = CACHE.get_or_init(Default::default).lock() else {
        return Regex::new(pattern).ok();
    };
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| Regex::new(pattern).ok())
        .clone()
}

fn matches(root: &Value, schema: &Value, instance: &Value) -> bool {
    let mut out = Vec::new();
    let mut path = Vec::new();
    check(root, schema, instance, &mut path, &mut out);
    out.is_empty()
}

pub(crate) fn type_matches(instance: &Value, type_name: &str) -> bool {
    match type_name {
        "null" => instance.is_null(),
        "boolean" => instance.is_boolean(),
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => match instance {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
            _ => false,
        },
        _ => true,
    }
}

/// Equality with JSON-Schema number semantics (`1 == 1.0`).
pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).map(|w| json_eq(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn format_ok(format: &str, s: &str) -> bool {
    match format {
        "email" => s.contains('@') && s.len() >= 3,
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    }
}

fn check(root: &Value, schema: &Value, instance: &Value, path: &mut Vec<Value>, out: &mut Vec<ValidationIssue>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        if let Some(target) = resolve_ref(root, reference) {
            check(root, target, instance, path, out);
        }
        return;
    }

    if let Some(type_) = schema.get("type") {
        let ok = match type_ {
            Value::String(t) => type_matches(instance, t),
            Value::Array(types) => types.iter().filter_map(Value::as_str).any(|t| type_matches(instance, t)),
            _ => true,
        };
        if !ok {
            issue(out, path, schema, "type", format!("{} is not of type {}", instance, type_));
        }
    }

    if let Some(Value::Array(values)) = schema.get("enum") {
        if !values.iter().any(|v| json_eq(v, instance)) {
            issue(out, path, schema, "enum", format!("{} is not one of {}", instance, Value::Array(values.clone())));
        }
    }

    if let Some(n) = instance.as_f64().filter(|_| instance.is_number()) {
        check_number(schema, n, path, out);
    }
    if let Value::String(s) = instance {
        check_string(schema, s, path, out);
    }
    if let Value::Array(items) = instance {
        check_array(root, schema, items, path, out);
    }
    if let Value::Object(obj) = instance {
        check_object(root, schema, obj, path, out);
    }

    if let Some(Value::Array(all)) = schema.get("allOf") {
        for sub in all {
            check(root, sub, instance, path, out);
        }
    }
    if let Some(Value::Array(any)) = schema.get("anyOf") {
        if !any.iter().any(|sub| matches(root, sub, instance)) {
            issue(out, path, schema, "anyOf", format!("{} is not valid under any of the given schemas", instance));
        }
    }
    if let Some(Value::Array(one)) = schema.get("oneOf") {
        let valid = one.iter().filter(|sub| matches(root, sub, instance)).count();
        if valid == 0 {
            issue(out, path, schema, "oneOf", format!("{} is not valid under any of the given schemas", instance));
        } else if valid > 1 {
            issue(out, path, schema, "oneOf", format!("{} is valid under each of {} schemas", instance, valid));
        }
    }
    if let Some(not) = schema.get("not") {
        if matches(root, not, instance) {
            issue(out, path, schema, "not", format!("{} must not be valid under the given schema", instance));
        }
    }
}

fn check_number(schema: &Map<String, Value>, n: f64, path: &[Value], out: &mut Vec<ValidationIssue>) {
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        let exclusive = schema.get("exclusiveMinimum").and_then(Value::as_bool).unwrap_or(false);
        if n < min || (exclusive && n == min) {
            issue(out, path, schema, "minimum", format!("{} is less than the minimum of {}", n, min));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        let exclusive = schema.get("exclusiveMaximum").and_then(Value::as_bool).unwrap_or(false);
        if n > max || (exclusive && n == max) {
            issue(out, path, schema, "maximum", format!("{} is greater than the maximum of {}", n, max));
        }
    }
    if let Some(step) = schema.get("multipleOf").and_then(Value::as_f64) {
        if step > 0.0 && (n / step).fract().abs() > f64::EPSILON {
            issue(out, path, schema, "multipleOf", format!("{} is not a multiple of {}", n, step));
        }
    }
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &[Value], out: &mut Vec<ValidationIssue>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            issue(out, path, schema, "minLength", format!("'{}' is too short", s));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            issue(out, path, schema, "maxLength", format!("'{}' is too long", s));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match compiled(pattern) {
            Some(re) if re.is_match(s) => {}
            Some(_) => issue(out, path, schema, "pattern", format!("'{}' does not match '{}'", s, pattern)),
            None => issue(out, path, schema, "pattern", format!("invalid pattern '{}'", pattern)),
        }
    }
    if let Some(format) = schema.get("format").and_then(Value::as_str) {
        if !format_ok(format, s) {
            issue(out, path, schema, "format", format!("'{}' is not a '{}'", s, format));
        }
    }
}

fn check_array(root: &Value, schema: &Map<String, Value>, items: &[Value], path: &mut Vec<Value>, out: &mut Vec<ValidationIssue>) {
    match schema.get("items") {
        Some(Value::Array(tuple)) => {
            for (index, (item, sub)) in items.iter().zip(tuple).enumerate() {
                path.push(Value::from(index));
                check(root, sub, item, path, out);
                path.pop();
            }
            if items.len() > tuple.len() {
                match schema.get("additionalItems") {
                    Some(Value::Bool(false)) => issue(
                        out,
                        path,
                        schema,
                        "additionalItems",
                        "Additional items are not allowed".to_string(),
                    ),
                    Some(sub @ Value::Object(_)) => {
                        for (index, item) in items.iter().enumerate().skip(tuple.len()) {
                            path.push(Value::from(index));
                            check(root, sub, item, path, out);
                            path.pop();
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(sub @ Value::Object(_)) => {
            for (index, item) in items.iter().enumerate() {
                path.push(Value::from(index));
                check(root, sub, item, path, out);
                path.pop();
            }
        }
        _ => {}
    }
    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if len < min {
            issue(out, path, schema, "minItems", format!("array is too short (minimum {})", min));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if len > max {
            issue(out, path, schema, "maxItems", format!("array is too long (maximum {})", max));
        }
    }
    if schema.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false) {
        let duplicate = items
            .iter()
            .enumerate()
            .any(|(i, a)| items[i + 1..].iter().any(|b| json_eq(a, b)));
        if duplicate {
            issue(out, path, schema, "uniqueItems", "array has non-unique elements".to_string());
        }
    }
}

fn check_object(root: &Value, schema: &Map<String, Value>, obj: &Map<String, Value>, path: &mut Vec<Value>, out: &mut Vec<ValidationIssue>) {
    if let Some(Value::Array(required)) = schema.get("required") {
        let missing: Vec<Value> = required
            .iter()
            .filter(|name| name.as_str().map(|n| !obj.contains_key(n)).unwrap_or(false))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let message = missing
                .iter()
                .map(|m| format!("{} is a required property", m))
                .collect::<Vec<_>>()
                .join("; ");
            out.push(ValidationIssue::new(path.to_vec(), "required", Value::Array(missing), message));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let patterns: Vec<(Regex, &Value)> = schema
        .get("patternProperties")
        .and_then(Value::as_object)
        .map(|pp| {
            pp.iter()
                .filter_map(|(p, sub)| compiled(p).map(|re| (re, sub)))
                .collect()
        })
        .unwrap_or_default();

    for (key, value) in obj {
        let mut known = false;
        if let Some(sub) = properties.and_then(|p| p.get(key)) {
            known = true;
            path.push(Value::String(key.clone()));
            check(root, sub, value, path, out);
            path.pop();
        }
        for (re, sub) in &patterns {
            if re.is_match(key) {
                known = true;
                path.push(Value::String(key.clone()));
                check(root, sub, value, path, out);
                path.pop();
            }
        }
        if known {
            continue;
        }
        match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => issue(
                out,
                path,
                schema,
                "additionalProperties",
                format!("Additional properties are not allowed ('{}' was unexpected)", key),
            ),
            Some(sub @ Value::Object(_)) => {
                path.push(Value::String(key.clone()));
                check(root, sub, value, path, out);
                path.pop();
            }
            _ => {}
        }
    }

    let len = obj.len() as u64;
    if let Some(min) = schema.get("minProperties").and_then(Value::as_u64) {
        if len < min {
            issue(out, path, schema, "minProperties", format!("object has fewer than {} properties", min));
        }
    }
    if let Some(max) = schema.get("maxProperties").and_then(Value::as_u64) {
        if len > max {
            issue(out, path, schema, "maxProperties", format!("object has more than {} properties", max));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(instance: Value, schema: Value) -> Vec<ValidationIssue> {
        Draft4Validator.iter_errors(&instance, &schema)
    }

    #[test]
    fn required_lists_missing_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"title": {"type": "string"}, "year": {"type": "integer"}},
            "required": ["title", "year"]
        });
        let errs = errors(json!({"title": "Foo"}), schema);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].validator, "required");
        assert_eq!(errs[0].validator_value, json!(["year"]));
        assert!(errs[0].path.is_empty());
    }

    #[test]
    fn nested_errors_carry_paths() {
        let schema = json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string", "maxLength": 3}}}
        });
        let errs = errors(json!({"tags": ["ok", "too long"]}), schema);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, vec![json!("tags"), json!(1)]);
        assert_eq!(errs[0].validator, "maxLength");
    }

    #[test]
    fn additional_properties_false_rejects_unknown_keys() {
        let schema = json!({"type": "object", "properties": {"a": {}}, "additionalProperties": false});
        assert!(errors(json!({"a": 1}), schema.clone()).is_empty());
        assert_eq!(errors(json!({"b": 1}), schema)[0].validator, "additionalProperties");
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        assert!(errors(json!(3), json!({"type": "integer"})).is_empty());
        assert!(errors(json!(3.0), json!({"type": "integer"})).is_empty());
        assert!(!errors(json!(3.5), json!({"type": "integer"})).is_empty());
    }

    #[test]
    fn one_of_requires_exactly_one_match() {
        let schema = json!({"oneOf": [{"type": "integer"}, {"type": "number"}]});
        assert_eq!(errors(json!(1), schema.clone())[0].validator, "oneOf");
        assert!(errors(json!(1.5), schema).is_empty());
    }

    #[test]
    fn tuple_items_and_unique_items() {
        let schema = json!({"type": "array", "items": [{"type": "string"}, {"type": "integer"}], "additionalItems": false});
        assert!(errors(json!(["a", 1]), schema.clone()).is_empty());
        assert_eq!(errors(json!(["a", 1, 2]), schema)[0].validator, "additionalItems");
        let unique = json!({"type": "array", "uniqueItems": true});
        assert_eq!(errors(json!([1, 1.0]), unique)[0].validator, "uniqueItems");
    }

    #[test]
    fn root_reference_resolves() {
        let schema = json!({
            "type": "object",
            "properties": {"child": {"anyOf": [{"$ref": "#"}, {"type": "null"}]}, "n": {"type": "integer"}},
            "additionalProperties": false
        });
        assert!(errors(json!({"child": {"child": null, "n": 1}}), schema.clone()).is_empty());
        assert!(!errors(json!({"child": {"n": "x"}}), schema).is_empty());
    }

    #[test]
    fn formats_and_patterns() {
        assert!(errors(json!("2020-01-31"), json!({"format": "date"})).is_empty());
        assert!(!errors(json!("2020-13-31"), json!({"format": "date"})).is_empty());
        assert!(!errors(json!("not-a-uuid"), json!({"format": "uuid"})).is_empty());
        assert!(errors(json!("/book/1"), json!({"pattern": "^/book/[^/]+$"})).is_empty());
        assert!(!errors(json!("/author/1"), json!({"pattern": "^/book/[^/]+$"})).is_empty());
    }

    #[test]
    fn patterns_compile_once() {
        let schema = json!({"pattern": "^isbn-[0-9]+$"});
        for _ in 0..3 {
            assert!(errors(json!("isbn-42"), schema.clone()).is_empty());
        }
        let first = compiled("^isbn-[0-9]+$").unwrap();
        let second = compiled("^isbn-[0-9]+$").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(compiled("(unclosed").is_none());
        assert_eq!(errors(json!("x"), json!({"pattern": "(unclosed"}))[0].validator, "pattern");
    }
}
