//! Collection queries: `where`, `sort`, `page` and `per_page` parsing.

use super::Resource;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::filters::{convert_filters, field_where_schema, Condition, Sort};
use crate::schema::Context;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// A parsed collection query.
#[derive(Clone, Debug)]
pub struct InstancesQuery {
    pub where_: Vec<Condition>,
    pub sort: Vec<Sort>,
    pub page: u64,
    pub per_page: u64,
}

/// Query strings carry numbers as text; anything unparsable is kept as a
/// string so that validation reports it.
fn query_number(raw: &str) -> Value {
    match raw.trim().parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(raw),
    }
}

fn query_json(key: &str, raw: &str) -> Result<Value, ApiError> {
    serde_json::from_str(raw).map_err(|e| ApiError::InvalidJson(format!("{}: {}", key, e)))
}

impl Resource {
    pub fn where_schema(&self, ctx: Context<'_>) -> Value {
        let properties: Map<String, Value> = self
            .filters
            .iter()
            .map(|(key, filters)| (key.clone(), field_where_schema(filters, ctx)))
            .collect();
        json!({"type": "object", "properties": properties, "additionalProperties": false})
    }

    pub fn sort_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .sort_fields
            .keys()
            .map(|key| {
                (
                    key.clone(),
                    json!({
                        "type": "boolean",
                        "description": format!("Sort by {} in descending order if 'true', ascending order if 'false'.", key)
                    }),
                )
            })
            .collect();
        json!({"type": "object", "properties": properties, "additionalProperties": false})
    }

    /// Request schema of the instances route.
    pub fn instances_schema(&self, ctx: Context<'_>, api: &ApiConfig) -> Value {
        json!({
            "type": "object",
            "properties": {
                "where": self.where_schema(ctx),
                "sort": self.sort_schema(),
                "page": pagination_schema(api)["properties"]["page"].clone(),
                "per_page": pagination_schema(api)["properties"]["per_page"].clone()
            },
            "additionalProperties": true
        })
    }

    /// Parses and validates query arguments into conditions, sort terms and page bounds.
    pub async fn parse_instances(
        &self,
        query: &HashMap<String, String>,
        ctx: Context<'_>,
        api: &ApiConfig,
    ) -> Result<InstancesQuery, ApiError> {
        let mut args = Map::new();
        if let Some(raw) = query.get("where") {
            args.insert("where".into(), query_json("where", raw)?);
        }
        if let Some(raw) = query.get("sort") {
            args.insert("sort".into(), query_json("sort", raw)?);
        }
        for key in ["page", "per_page"] {
            if let Some(raw) = query.get(key) {
                args.insert(key.into(), query_number(raw));
            }
        }
        let args = Value::Object(args);
        ctx.validate(&args, &self.instances_schema(ctx, api))?;

        let mut where_ = Vec::new();
        if let Some(Value::Object(clauses)) = args.get("where") {
            for (key, value) in clauses {
                let Some(filters) = self.filters.get(key) else { continue };
                let condition = convert_filters(value, filters, ctx)
                    .await
                    .map_err(|e| e.prefixed(json!(key)).prefixed(json!("where")))?;
                where_.push(condition);
            }
        }

        let mut sort = Vec::new();
        if let Some(Value::Object(terms)) = args.get("sort") {
            for (key, descending) in terms {
                let Some(field) = self.sort_fields.get(key) else { continue };
                sort.push(Sort {
                    attribute: field.attribute_or(key).to_string(),
                    field: field.clone(),
                    descending: descending.as_bool().unwrap_or(false),
                });
            }
        }
        if sort.is_empty() {
            if let Some(key) = &self.config.sort_attribute {
                if let Some(field) = self.schema.get(key) {
                    sort.push(Sort { attribute: field.attribute_or(key).to_string(), field: field.clone(), descending: false });
                }
            }
        }

        let (page, per_page) = page_args(&args, api);
        Ok(InstancesQuery { where_, sort, page, per_page })
    }
}

/// `page`/`per_page` arguments shared by collection and relation listings.
pub fn pagination_schema(api: &ApiConfig) -> Value {
    json!({
        "type": "object",
        "properties": {
            "page": {"type": "integer", "minimum": 1, "default": 1},
            "per_page": {
                "type": "integer",
                "minimum": 1,
                "maximum": api.max_per_page,
                "default": api.default_per_page
            }
        },
        "additionalProperties": true
    })
}

fn page_args(args: &Value, api: &ApiConfig) -> (u64, u64) {
    let page = args.get("page").and_then(Value::as_u64).unwrap_or(1);
    let per_page = args.get("per_page").and_then(Value::as_u64).unwrap_or(api.default_per_page);
    (page, per_page)
}

/// Validates the page arguments of a relation listing.
pub fn parse_page(query: &HashMap<String, String>, ctx: Context<'_>, api: &ApiConfig) -> Result<(u64, u64), ApiError> {
    let mut args = Map::new();
    for key in ["page", "per_page"] {
        if let Some(raw) = query.get(key) {
            args.insert(key.into(), query_number(raw));
        }
    }
    let args = Value::Object(args);
    ctx.validate(&args, &pagination_schema(api))?;
    Ok(page_args(&args, api))
}
