use crate::error::{ApiError, ConfigError};
use crate::fields::Field;
use crate::schema::Context;
use crate::Item;
use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Map, Value};

/// Which write direction a request body is converted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertMode {
    /// Full body; required fields enforced, defaults applied.
    Create,
    /// Partial body; only the supplied keys are converted.
    Patch,
}

/// Ordered field declarations of a resource.
#[derive(Clone, Debug, Default)]
pub struct FieldSet {
    pub fields: IndexMap<String, Field>,
    explicit_required: IndexSet<String>,
    optional: IndexSet<String>,
}

impl FieldSet {
    pub fn new() -> Self {
        FieldSet::default()
    }

    pub fn field(mut self, key: &str, field: Field) -> Self {
        self.insert(key, field);
        self
    }

    /// Marks a field required on create even if it is nullable or has a default.
    pub fn require(mut self, key: &str) -> Self {
        self.set_required(key);
        self
    }

    pub fn insert(&mut self, key: &str, field: Field) {
        self.fields.insert(key.to_string(), field);
    }

    pub fn set_required(&mut self, key: &str) {
        self.explicit_required.insert(key.to_string());
    }

    /// Exempts a field from the implicit required rule (e.g. a column with a backend default).
    pub fn set_optional(&mut self, key: &str) {
        self.optional.insert(key.to_string());
    }

    /// Adds `other`'s fields, replacing same-named ones in place.
    pub fn extend(&mut self, other: &FieldSet) {
        for (key, field) in &other.fields {
            self.fields.insert(key.clone(), field.clone());
            self.optional.shift_remove(key);
        }
        self.explicit_required.extend(other.explicit_required.iter().cloned());
        self.optional.extend(other.optional.iter().cloned());
    }

    pub fn remove(&mut self, key: &str) -> Option<Field> {
        self.explicit_required.shift_remove(key);
        self.optional.shift_remove(key);
        self.fields.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.fields.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Creatable fields that must be present on create: the explicit ones plus
    /// every non-nullable field without a default.
    pub fn required(&self) -> IndexSet<String> {
        self.fields
            .iter()
            .filter(|(key, field)| {
                field.io.create
                    && (self.explicit_required.contains(*key)
                        || (!field.nullable && field.default.is_none() && !self.optional.contains(*key)))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn read_only(&self) -> IndexSet<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.io.is_read_only())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn readable(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter().filter(|(_, f)| f.io.read)
    }

    pub fn bind(&mut self, owner: &str) {
        for field in self.fields.values_mut() {
            field.bind(owner);
        }
    }

    pub fn resolve(&mut self, is_registered: &dyn Fn(&str) -> bool) -> Result<(), ConfigError> {
        for field in self.fields.values_mut() {
            field.resolve(is_registered)?;
        }
        Ok(())
    }

    /// Schema of the representation sent to clients.
    pub fn response(&self, ctx: Context<'_>) -> Value {
        let properties: Map<String, Value> = self
            .readable()
            .map(|(key, field)| (key.clone(), field.response(ctx)))
            .collect();
        json!({"type": "object", "properties": properties})
    }

    pub fn create_schema(&self, ctx: Context<'_>) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .filter(|(_, f)| f.io.create)
            .map(|(key, field)| (key.clone(), field.request(ctx)))
            .collect();
        let mut schema = json!({"type": "object", "additionalProperties": false, "properties": properties});
        let required = self.required();
        if !required.is_empty() {
            schema["required"] = json!(required.into_iter().collect::<Vec<_>>());
        }
        schema
    }

    pub fn update_schema(&self, ctx: Context<'_>) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .filter(|(_, f)| f.io.update)
            .map(|(key, field)| (key.clone(), field.request(ctx)))
            .collect();
        json!({"type": "object", "additionalProperties": false, "properties": properties})
    }

    /// Backend item to its wire representation (readable fields only).
    pub fn format(&self, item: &Item, ctx: Context<'_>) -> Value {
        let out: Map<String, Value> = self
            .readable()
            .map(|(key, field)| (key.clone(), field.output(key, item, ctx)))
            .collect();
        Value::Object(out)
    }

    /// Validates a request body and converts it into backend properties keyed by attribute.
    pub async fn convert(&self, instance: &Value, mode: ConvertMode, ctx: Context<'_>) -> Result<Item, ApiError> {
        let schema = match mode {
            ConvertMode::Create => self.create_schema(ctx),
            ConvertMode::Patch => self.update_schema(ctx),
        };
        ctx.validate(instance, &schema)?;
        let Value::Object(body) = instance else {
            return Err(ApiError::validation(vec![], "type", json!("object"), "body must be an object"));
        };

        let mut out = Item::new();
        let mut issues = Vec::new();
        for (key, field) in &self.fields {
            let writable = match mode {
                ConvertMode::Create => field.io.create,
                ConvertMode::Patch => field.io.update,
            };
            if !writable {
                continue;
            }
            match body.get(key) {
                Some(value) => match field.convert_valid(value, ctx).await {
                    Ok(converted) => {
                        out.insert(field.attribute_or(key).to_string(), converted);
                    }
                    Err(err @ ApiError::Validation(_)) => {
                        if let ApiError::Validation(nested) = err.prefixed(json!(key)) {
                            issues.extend(nested);
                        }
                    }
                    Err(other) => return Err(other),
                },
                None if mode == ConvertMode::Create => {
                    if let Some(default) = &field.default {
                        out.insert(field.attribute_or(key).to_string(), default.clone());
                    }
                }
                None => {}
            }
        }
        if issues.is_empty() {
            Ok(out)
        } else {
            Err(ApiError::Validation(issues))
        }
    }
}
