//! Rewrites a JSON-Schema so that it also accepts `null`.

use serde_json::{json, Value};

const COMBINATORS: [&str; 5] = ["$ref", "allOf", "anyOf", "oneOf", "not"];

fn accepts_null_literal(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == "null",
        Some(Value::Array(types)) => types.iter().any(|t| t == "null"),
        _ => false,
    }
}

/// Returns a schema accepting exactly what `schema` accepts plus `null`.
///
/// A bare `type` gains a `"null"` entry (and `enum`, when present, gains `null`),
/// `oneOf`/`anyOf` gain a `{"type": "null"}` branch, and any other constraining
/// shape (`$ref`, `allOf`, `enum`, `not`) is wrapped into `anyOf`, as is a
/// `type` that sits next to a combinator.
pub fn make_nullable(schema: Value) -> Value {
    let Value::Object(mut map) = schema else {
        return schema;
    };

    if map.contains_key("type") && COMBINATORS.iter().any(|k| map.contains_key(*k)) {
        return json!({"anyOf": [Value::Object(map), {"type": "null"}]});
    }

    if let Some(type_) = map.get_mut("type") {
        match type_ {
            Value::String(t) if t != "null" => {
                let t = t.clone();
                *type_ = json!([t, "null"]);
            }
            Value::Array(types) if !types.iter().any(|t| t == "null") => types.push(json!("null")),
            _ => {}
        }
        if let Some(Value::Array(values)) = map.get_mut("enum") {
            if !values.contains(&Value::Null) {
                values.push(Value::Null);
            }
        }
        return Value::Object(map);
    }

    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(options)) = map.get_mut(key) {
            if !options.iter().any(accepts_null_literal) {
                options.push(json!({"type": "null"}));
            }
            return Value::Object(map);
        }
    }

    if ["$ref", "allOf", "enum", "not"].iter().any(|k| map.contains_key(*k)) {
        return json!({"anyOf": [Value::Object(map), {"type": "null"}]});
    }

    // No constraint on the instance type: null is already accepted.
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validator::{Draft4Validator, SchemaValidator};

    #[test]
    fn bare_type_gains_null() {
        assert_eq!(make_nullable(json!({"type": "string"})), json!({"type": ["string", "null"]}));
        assert_eq!(
            make_nullable(json!({"type": ["string", "integer"]})),
            json!({"type": ["string", "integer", "null"]})
        );
        assert_eq!(make_nullable(json!({"type": ["null"]})), json!({"type": ["null"]}));
    }

    #[test]
    fn unions_gain_null_branch() {
        assert_eq!(
            make_nullable(json!({"oneOf": [{"type": "string"}, {"type": "integer"}]})),
            json!({"oneOf": [{"type": "string"}, {"type": "integer"}, {"type": "null"}]})
        );
        assert_eq!(
            make_nullable(json!({"anyOf": [{"type": "string"}, {"type": "null"}]})),
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]})
        );
    }

    #[test]
    fn reference_is_wrapped() {
        assert_eq!(
            make_nullable(json!({"$ref": "#"})),
            json!({"anyOf": [{"$ref": "#"}, {"type": "null"}]})
        );
    }

    #[test]
    fn constraints_survive_and_null_validates() {
        let v = Draft4Validator;
        let schema = make_nullable(json!({"type": "string", "enum": ["a", "b"], "minLength": 1}));
        assert!(v.is_valid(&Value::Null, &schema));
        assert!(v.is_valid(&json!("a"), &schema));
        assert!(!v.is_valid(&json!("c"), &schema));
        assert!(!v.is_valid(&json!(1), &schema));
    }

    #[test]
    fn typed_combinators_are_wrapped() {
        let v = Draft4Validator;
        let schema = make_nullable(json!({"type": "string", "not": {"type": "string"}}));
        assert_eq!(
            schema,
            json!({"anyOf": [{"type": "string", "not": {"type": "string"}}, {"type": "null"}]})
        );
        assert!(v.is_valid(&Value::Null, &schema));
        assert!(!v.is_valid(&json!("a"), &schema));

        let schema = make_nullable(json!({"type": "integer", "allOf": [{"minimum": 1}]}));
        assert!(v.is_valid(&Value::Null, &schema));
        assert!(v.is_valid(&json!(2), &schema));
        assert!(!v.is_valid(&json!(0), &schema));
    }
}
