//! Alternate ways of pointing at an item: by link, by id, or by natural key.

use crate::config::NaturalKeyConfig;
use crate::error::ApiError;
use crate::filters::Condition;
use crate::resource::Resource;
use crate::schema::Context;
use crate::Item;
use serde_json::{json, Map, Value};

/// One way of resolving a wire value to an item of a target resource.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyResolver {
    /// `{"$ref": "/target/1"}`
    Ref,
    /// The bare id.
    Id,
    /// The value of one unique property.
    Property(String),
    /// A tuple of property values.
    Properties(Vec<String>),
}

impl KeyResolver {
    pub fn from_config(config: &NaturalKeyConfig) -> Self {
        match config {
            NaturalKeyConfig::Property(key) => KeyResolver::Property(key.clone()),
            NaturalKeyConfig::Properties(keys) => KeyResolver::Properties(keys.clone()),
        }
    }

    pub fn schema(&self, target: &Resource, ctx: Context<'_>) -> Value {
        match self {
            KeyResolver::Ref => ref_schema(&ctx.route_prefix(&target.name)),
            KeyResolver::Id => target.id_field.request(ctx),
            KeyResolver::Property(key) => target.schema.get(key).map(|f| f.request(ctx)).unwrap_or_else(|| json!({})),
            KeyResolver::Properties(keys) => {
                let items: Vec<Value> = keys
                    .iter()
                    .map(|key| target.schema.get(key).map(|f| f.request(ctx)).unwrap_or_else(|| json!({})))
                    .collect();
                json!({
                    "type": "array",
                    "items": items,
                    "additionalItems": false,
                    "minItems": keys.len(),
                    "maxItems": keys.len()
                })
            }
        }
    }

    /// Looks the item up. The value must already satisfy `schema`.
    pub async fn resolve(&self, value: &Value, target: &Resource, ctx: Context<'_>) -> Result<Item, ApiError> {
        match self {
            KeyResolver::Ref => {
                let href = value.get("$ref").and_then(Value::as_str).unwrap_or_default();
                let base = format!("{}/", ctx.route_prefix(&target.name));
                let segment = href
                    .strip_prefix(base.as_str())
                    .ok_or_else(|| ApiError::validation(vec![json!("$ref")], "pattern", json!(base), "link points at another resource"))?;
                let id = target.parse_id(segment)?;
                target.manager.read(&id).await
            }
            KeyResolver::Id => {
                let id = target.id_field.convert_valid(value, ctx).await?;
                target.manager.read(&id).await
            }
            KeyResolver::Property(key) => {
                let condition = property_condition(target, key, value, ctx).await?;
                first_where(target, vec![condition], json!({ key.as_str(): value })).await
            }
            KeyResolver::Properties(keys) => {
                let values = value.as_array().cloned().unwrap_or_default();
                let mut conditions = Vec::with_capacity(keys.len());
                let mut where_ = Map::new();
                for (index, (key, v)) in keys.iter().zip(values.iter()).enumerate() {
                    conditions.push(property_condition(target, key, v, ctx).await.map_err(|e| e.prefixed(json!(index)))?);
                    where_.insert(key.clone(), v.clone());
                }
                first_where(target, conditions, Value::Object(where_)).await
            }
        }
    }
}

async fn property_condition(target: &Resource, key: &str, value: &Value, ctx: Context<'_>) -> Result<Condition, ApiError> {
    let field = target
        .schema
        .get(key)
        .ok_or_else(|| ApiError::Internal(format!("{} has no natural key field '{}'", target.name, key)))?;
    let converted = field.convert_valid(value, ctx).await?;
    Ok(Condition::equal(field.attribute_or(key), field.clone(), converted))
}

async fn first_where(target: &Resource, conditions: Vec<Condition>, where_: Value) -> Result<Item, ApiError> {
    match target.manager.first(&conditions, &[]).await {
        Err(ApiError::ItemNotFound { .. }) => Err(ApiError::not_found_where(&target.name, where_)),
        other => other,
    }
}

/// Response schema of an item link under `route_prefix` (e.g. `/api/book`).
pub fn ref_schema(route_prefix: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "$ref": {
                "type": "string",
                "format": "uri",
                "pattern": format!("^{}/[^/]+$", regex::escape(route_prefix))
            }
        },
        "required": ["$ref"],
        "additionalProperties": false
    })
}

/// Request schema of a to-one reference: any of the target's resolvers.
pub fn to_one_request_schema(target_name: &str, ctx: Context<'_>) -> Value {
    match ctx.resource(target_name) {
        Ok(target) => {
            let mut schemas: Vec<Value> = target.key_resolvers.iter().map(|r| r.schema(target, ctx)).collect();
            if schemas.len() == 1 {
                schemas.remove(0)
            } else {
                json!({ "anyOf": schemas })
            }
        }
        Err(_) => ref_schema(&ctx.route_prefix(target_name)),
    }
}

/// Resolves a reference value to the id of an existing item of `target_name`.
///
/// Resolvers are tried in declaration order; the first whose schema accepts the
/// value decides the outcome.
pub async fn resolve_reference(target_name: &str, value: &Value, ctx: Context<'_>) -> Result<Value, ApiError> {
    let target = ctx.resource(target_name)?;
    for resolver in &target.key_resolvers {
        let schema = resolver.schema(target, ctx);
        if ctx.validator().is_valid(value, &schema) {
            let item = resolver.resolve(value, target, ctx).await?;
            return Ok(item.get(target.id_attribute()).cloned().unwrap_or(Value::Null));
        }
    }
    Err(ApiError::validation(
        vec![],
        "anyOf",
        to_one_request_schema(target_name, ctx)
            .get("anyOf")
            .cloned()
            .unwrap_or(Value::Null),
        format!("{} is not a valid reference to {}", value, target_name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Draft4Validator, SchemaValidator};

    #[test]
    fn ref_schema_matches_links_of_its_resource_only() {
        let schema = ref_schema("/api/author");
        let validator = Draft4Validator;
        assert!(validator.is_valid(&json!({"$ref": "/api/author/3"}), &schema));
        assert!(!validator.is_valid(&json!({"$ref": "/api/book/3"}), &schema));
        assert!(!validator.is_valid(&json!({"$ref": "/api/author/3/x"}), &schema));
        assert!(!validator.is_valid(&json!(3), &schema));
    }

    #[test]
    fn detached_to_one_schema_is_a_link() {
        let ctx = Context::detached();
        assert_eq!(to_one_request_schema("author", ctx), ref_schema("/author"));
    }
}
