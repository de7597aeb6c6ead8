//! Serde config types: api settings, resource meta and backend model declarations.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Api-wide settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// URL prefix, normalized to `""` or `"/segment"`.
    pub prefix: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub default_per_page: u64,
    pub max_per_page: u64,
    /// Pretty-printed JSON and debug-only error details.
    pub debug: bool,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            prefix: String::new(),
            title: None,
            description: None,
            default_per_page: 20,
            max_per_page: 100,
            debug: false,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFieldKind {
    #[default]
    Integer,
    PositiveInteger,
    String,
    Uuid,
}

/// `allowed_filters`: `true`/`false`, `"*"`, or a per-field map (`"*"` key as wildcard).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FiltersConfig {
    All(bool),
    Wildcard(String),
    Fields(IndexMap<String, FieldFilterConfig>),
}

impl Default for FiltersConfig {
    fn default() -> Self {
        FiltersConfig::All(true)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldFilterConfig {
    All(bool),
    /// Operator names without the `$`; `"eq"` also enables implicit equality.
    Names(Vec<String>),
}

/// One alternate key: a single property or a property tuple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NaturalKeyConfig {
    Property(String),
    Properties(Vec<String>),
}

/// A permission need: one expression, or a list where any one suffices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeedsConfig {
    One(String),
    Many(Vec<String>),
}

impl NeedsConfig {
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            NeedsConfig::One(s) => vec![s.as_str()],
            NeedsConfig::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Resource meta options.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Backend attribute holding the item id (defaults to `"id"`).
    pub id_attribute: Option<String>,
    pub id_field: IdFieldKind,
    /// Emit `$id` instead of `$uri`.
    pub include_id: bool,
    pub include_type: bool,
    pub include_fields: Option<Vec<String>>,
    pub exclude_fields: Vec<String>,
    pub read_only_fields: Vec<String>,
    pub write_only_fields: Vec<String>,
    pub required_fields: Vec<String>,
    pub allowed_filters: FiltersConfig,
    /// Default ordering attribute; also the key to-one sorts on from other resources.
    pub sort_attribute: Option<String>,
    pub natural_keys: Vec<NaturalKeyConfig>,
    pub permissions: Option<IndexMap<String, NeedsConfig>>,
    /// Built-in route attributes to skip (`instances`, `create`, `self`, `update`, `destroy`).
    pub exclude_routes: Vec<String>,
}

impl ResourceConfig {
    pub fn named(name: &str) -> Self {
        ResourceConfig { name: name.to_string(), ..Default::default() }
    }

    pub fn id_attribute(&self) -> &str {
        self.id_attribute.as_deref().unwrap_or("id")
    }
}

/// A backend table declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    /// Column sets carrying a unique constraint.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_schema() -> String {
    "public".into()
}

fn default_primary_key() -> String {
    "id".into()
}

fn default_key_type() -> String {
    "integer".into()
}

impl ModelDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnConfig> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, attribute: &str) -> Option<&RelationshipConfig> {
        self.relationships.iter().find(|r| r.attribute() == attribute)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    pub fn params(&self) -> &[u32] {
        match self {
            ColumnTypeConfig::Parameterized { params: Some(p), .. } => p,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Number(n) => Ok(ColumnDefaultConfig::Literal(n.to_string())),
            serde_json::Value::Bool(b) => Ok(ColumnDefaultConfig::Literal(b.to_string())),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(serde_json::Value::String(s)) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(s));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a string, {{ \"expression\": \"...\" }}, or {{ \"value\": \"...\" }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(serde::de::Error::custom(format!(
                "column default must be a string or {{ \"expression\": \"...\" }}; got {}",
                type_name_of_json(&other)
            ))),
        }
    }
}

fn type_name_of_json(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub column: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Column of the referenced table used when sorting by this key.
    #[serde(default)]
    pub sort_column: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyConfig>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A to-many relation exposed as an attribute of the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationshipConfig {
    /// Membership rows in a join table.
    ManyToMany {
        attribute: String,
        join_table: String,
        source_column: String,
        target_column: String,
        /// Type of `target_column`, used to cast bound ids.
        #[serde(default = "default_key_type")]
        target_type: String,
    },
    /// Target rows pointing back through a foreign key.
    OneToMany {
        attribute: String,
        target_table: String,
        #[serde(default = "default_primary_key")]
        target_primary_key: String,
        foreign_key: String,
    },
}

impl RelationshipConfig {
    pub fn attribute(&self) -> &str {
        match self {
            RelationshipConfig::ManyToMany { attribute, .. } | RelationshipConfig::OneToMany { attribute, .. } => {
                attribute
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_config_defaults() {
        let config: ResourceConfig = serde_json::from_value(json!({"name": "book"})).unwrap();
        assert_eq!(config.id_attribute(), "id");
        assert_eq!(config.allowed_filters, FiltersConfig::All(true));
        assert_eq!(config.id_field, IdFieldKind::Integer);
    }

    #[test]
    fn filters_config_shapes() {
        let star: FiltersConfig = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(star, FiltersConfig::Wildcard("*".into()));
        let map: FiltersConfig = serde_json::from_value(json!({"title": ["eq", "contains"], "*": true})).unwrap();
        let FiltersConfig::Fields(map) = map else { panic!("expected field map") };
        assert_eq!(map["title"], FieldFilterConfig::Names(vec!["eq".into(), "contains".into()]));
        assert_eq!(map["*"], FieldFilterConfig::All(true));
    }

    #[test]
    fn model_definition_parses() {
        let model: ModelDefinition = serde_json::from_value(json!({
            "table": "book",
            "columns": [
                {"name": "id", "type": "serial", "nullable": false},
                {"name": "title", "type": {"name": "varchar", "params": [200]}, "nullable": false},
                {"name": "pages", "type": "integer", "default": 100},
                {"name": "author_id", "type": "integer", "foreign_key": {"table": "author"}}
            ],
            "relationships": [
                {"kind": "many_to_many", "attribute": "tags", "join_table": "book_tag",
                 "source_column": "book_id", "target_column": "tag_id"}
            ]
        }))
        .unwrap();
        assert_eq!(model.schema, "public");
        assert_eq!(model.primary_key, "id");
        assert_eq!(model.column("title").map(|c| c.type_.params().to_vec()), Some(vec![200]));
        assert!(matches!(model.column("pages").and_then(|c| c.default.clone()), Some(ColumnDefaultConfig::Literal(ref s)) if s == "100"));
        assert_eq!(model.relationship("tags").map(|r| r.attribute()), Some("tags"));
    }
}
