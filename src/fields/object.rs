use super::{Field, ResourceRef};
use crate::error::{ApiError, ConfigError};
use crate::schema::Context;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{json, Map, Value};

#[derive(Clone, Debug)]
enum Shape {
    Properties(IndexMap<String, Field>),
    Pattern { pattern: String, value: Box<Field> },
    Additional(Box<Field>),
}

/// Object values with either named properties, regex-matched keys or one uniform value type.
#[derive(Clone, Debug)]
pub struct ObjectField {
    shape: Shape,
}

impl ObjectField {
    pub fn properties(properties: IndexMap<String, Field>) -> Self {
        ObjectField { shape: Shape::Properties(properties) }
    }

    /// Free-form keys, every value of the same field type.
    pub fn values(value: Field) -> Self {
        ObjectField { shape: Shape::Additional(Box::new(value)) }
    }

    pub fn pattern(pattern: &str, value: Field) -> Result<Self, ConfigError> {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidField(format!("invalid key pattern '{}': {}", pattern, e)))?;
        Ok(ObjectField {
            shape: Shape::Pattern { pattern: pattern.to_string(), value: Box::new(value) },
        })
    }

    /// Builds from optional parts; exactly one of them must be given.
    pub fn new(
        properties: Option<IndexMap<String, Field>>,
        pattern: Option<(&str, Field)>,
        additional: Option<Field>,
    ) -> Result<Self, ConfigError> {
        match (properties, pattern, additional) {
            (Some(properties), None, None) => Ok(ObjectField::properties(properties)),
            (None, Some((pattern, value)), None) => ObjectField::pattern(pattern, value),
            (None, None, Some(value)) => Ok(ObjectField::values(value)),
            (None, None, None) => Ok(ObjectField::values(Field::any())),
            (_, Some(_), Some(_)) => Err(ConfigError::InvalidField(
                "object fields cannot combine pattern and additional properties".into(),
            )),
            _ => Err(ConfigError::InvalidField(
                "object fields take one of properties, pattern properties or additional properties".into(),
            )),
        }
    }

    pub(crate) fn schema(&self, ctx: Context<'_>, request: bool) -> Value {
        let child = |field: &Field| if request { field.request(ctx) } else { field.response(ctx) };
        match &self.shape {
            Shape::Properties(properties) => {
                let props: Map<String, Value> = properties
                    .iter()
                    .filter(|(_, f)| if request { f.io.create || f.io.update } else { f.io.read })
                    .map(|(key, f)| (key.clone(), child(f)))
                    .collect();
                json!({"type": "object", "properties": props, "additionalProperties": false})
            }
            Shape::Pattern { pattern, value } => json!({
                "type": "object",
                "patternProperties": {pattern.as_str(): child(value)},
                "additionalProperties": false
            }),
            Shape::Additional(value) => json!({"type": "object", "additionalProperties": child(value)}),
        }
    }

    pub(crate) fn format(&self, value: &Value, ctx: Context<'_>) -> Value {
        let Value::Object(map) = value else {
            return value.clone();
        };
        match &self.shape {
            Shape::Properties(properties) => Value::Object(
                properties
                    .iter()
                    .filter(|(_, f)| f.io.read)
                    .map(|(key, f)| (key.clone(), f.output(key, map, ctx)))
                    .collect(),
            ),
            Shape::Pattern { value: inner, .. } | Shape::Additional(inner) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), inner.format(v, ctx))).collect(),
            ),
        }
    }

    pub(crate) async fn convert(&self, value: &Value, ctx: Context<'_>) -> Result<Value, ApiError> {
        let Value::Object(map) = value else {
            return Ok(value.clone());
        };
        let mut out = Map::new();
        match &self.shape {
            Shape::Properties(properties) => {
                for (key, field) in properties {
                    if let Some(v) = map.get(key) {
                        let converted = field.convert_valid(v, ctx).await.map_err(|e| e.prefixed(json!(key)))?;
                        out.insert(field.attribute_or(key).to_string(), converted);
                    }
                }
            }
            Shape::Pattern { value: inner, .. } | Shape::Additional(inner) => {
                for (key, v) in map {
                    let converted = inner.convert_valid(v, ctx).await.map_err(|e| e.prefixed(json!(key)))?;
                    out.insert(key.clone(), converted);
                }
            }
        }
        Ok(Value::Object(out))
    }

    pub(crate) fn visit_refs<E>(&mut self, f: &mut dyn FnMut(&mut ResourceRef) -> Result<(), E>) -> Result<(), E> {
        match &mut self.shape {
            Shape::Properties(properties) => {
                for field in properties.values_mut() {
                    field.visit_refs(f)?;
                }
                Ok(())
            }
            Shape::Pattern { value, .. } | Shape::Additional(value) => value.visit_refs(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_and_additional_cannot_combine() {
        let err = ObjectField::new(None, Some(("^[a-z]+$", Field::integer())), Some(Field::string()));
        assert!(matches!(err, Err(ConfigError::InvalidField(_))));
        assert!(ObjectField::pattern("([", Field::integer()).is_err());
    }

    #[test]
    fn schemas_by_shape() {
        let ctx = Context::detached();
        let values = ObjectField::values(Field::integer());
        assert_eq!(
            values.schema(ctx, false),
            json!({"type": "object", "additionalProperties": {"type": "integer"}})
        );
        let pattern = ObjectField::pattern("^[a-z]+$", Field::string()).unwrap();
        assert_eq!(
            pattern.schema(ctx, true),
            json!({
                "type": "object",
                "patternProperties": {"^[a-z]+$": {"type": "string"}},
                "additionalProperties": false
            })
        );
    }

    #[tokio::test]
    async fn properties_convert_into_attributes() {
        let ctx = Context::detached();
        let object = ObjectField::properties(
            [("name".to_string(), Field::string().attribute("label"))].into_iter().collect(),
        );
        let converted = object.convert(&json!({"name": "x"}), ctx).await.unwrap();
        assert_eq!(converted, json!({"label": "x"}));
        assert_eq!(object.format(&converted, ctx), json!({"name": "x"}));
    }
}
