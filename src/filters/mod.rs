//! Filter operators, per-type operator tables and `where` clause conversion.

mod condition;

pub use condition::{sort_cmp, Condition, Sort};
pub(crate) use condition::cmp_items;

use crate::config::{FieldFilterConfig, FiltersConfig};
use crate::error::{ApiError, ConfigError};
use crate::fields::{Field, FieldType};
use crate::schema::{Context, FieldSet};
use crate::schema::validator::json_eq;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    In,
    Contains,
    StringContains,
    StringIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Between,
}

impl FilterOp {
    /// Wire names for this operator; `None` is the implicit equality form.
    pub fn names(self) -> &'static [Option<&'static str>] {
        use FilterOp::*;
        match self {
            Equal => &[None, Some("eq")],
            NotEqual => &[Some("ne")],
            LessThan => &[Some("lt")],
            LessThanEqual => &[Some("lte")],
            GreaterThan => &[Some("gt")],
            GreaterThanEqual => &[Some("gte")],
            In => &[Some("in")],
            Contains | StringContains => &[Some("contains")],
            StringIContains => &[Some("icontains")],
            StartsWith => &[Some("startswith")],
            IStartsWith => &[Some("istartswith")],
            EndsWith => &[Some("endswith")],
            IEndsWith => &[Some("iendswith")],
            Between => &[Some("between")],
        }
    }

    /// In-memory predicate: `a` is the item's value, `b` the converted operand.
    pub fn apply(self, a: &Value, b: &Value) -> bool {
        use FilterOp::*;
        let order = || compare(a, b);
        match self {
            Equal => json_eq(a, b),
            NotEqual => !json_eq(a, b),
            LessThan => order() == Some(Ordering::Less),
            LessThanEqual => matches!(order(), Some(Ordering::Less | Ordering::Equal)),
            GreaterThan => order() == Some(Ordering::Greater),
            GreaterThanEqual => matches!(order(), Some(Ordering::Greater | Ordering::Equal)),
            In => b.as_array().map(|values| values.iter().any(|v| json_eq(a, v))).unwrap_or(false),
            Contains => a.as_array().map(|values| values.iter().any(|v| json_eq(v, b))).unwrap_or(false),
            StringContains => strings(a, b, false).map(|(a, b)| a.contains(&b)).unwrap_or(false),
            StringIContains => strings(a, b, true).map(|(a, b)| a.contains(&b)).unwrap_or(false),
            StartsWith => strings(a, b, false).map(|(a, b)| a.starts_with(&b)).unwrap_or(false),
            IStartsWith => strings(a, b, true).map(|(a, b)| a.starts_with(&b)).unwrap_or(false),
            EndsWith => strings(a, b, false).map(|(a, b)| a.ends_with(&b)).unwrap_or(false),
            IEndsWith => strings(a, b, true).map(|(a, b)| a.ends_with(&b)).unwrap_or(false),
            Between => match b.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    matches!(compare(a, low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(compare(a, high), Some(Ordering::Less | Ordering::Equal))
                }
                _ => false,
            },
        }
    }
}

fn strings(a: &Value, b: &Value, fold: bool) -> Option<(String, String)> {
    let (a, b) = (a.as_str()?, b.as_str()?);
    if fold {
        Some((a.to_lowercase(), b.to_lowercase()))
    } else {
        Some((a.to_string(), b.to_string()))
    }
}

/// Orders two scalar values of the same JSON type; `None` otherwise.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Operators applicable per field type. Lookup walks the field's type ancestry.
#[derive(Clone, Debug)]
pub struct FilterTable {
    by_type: Vec<(FieldType, Vec<FilterOp>)>,
}

impl FilterTable {
    pub fn standard() -> Self {
        use FilterOp::*;
        let comparable = vec![Equal, NotEqual, LessThan, LessThanEqual, GreaterThan, GreaterThanEqual];
        let with = |base: &Vec<FilterOp>, extra: &[FilterOp]| {
            let mut ops = base.clone();
            ops.extend_from_slice(extra);
            ops
        };
        FilterTable {
            by_type: vec![
                (FieldType::Boolean, vec![Equal, NotEqual, In]),
                (FieldType::Integer, with(&comparable, &[In])),
                (FieldType::Number, with(&comparable, &[In])),
                (
                    FieldType::String,
                    vec![
                        Equal,
                        NotEqual,
                        StringContains,
                        StringIContains,
                        StartsWith,
                        IStartsWith,
                        EndsWith,
                        IEndsWith,
                        In,
                    ],
                ),
                (FieldType::Uuid, vec![Equal, NotEqual, In]),
                (FieldType::Date, with(&comparable, &[Between, In])),
                (FieldType::DateString, with(&comparable, &[Between, In])),
                (FieldType::DateTime, with(&comparable, &[Between])),
                (FieldType::DateTimeString, with(&comparable, &[Between])),
                (FieldType::Array, vec![Contains]),
                (FieldType::ToOne, vec![Equal, NotEqual, In]),
                (FieldType::ToMany, vec![Contains]),
            ],
        }
    }

    /// Replaces (or adds) the operator list for one field type.
    pub fn with(mut self, field_type: FieldType, ops: Vec<FilterOp>) -> Self {
        match self.by_type.iter_mut().find(|(t, _)| *t == field_type) {
            Some(entry) => entry.1 = ops,
            None => self.by_type.push((field_type, ops)),
        }
        self
    }

    /// Operators for the most specific registered ancestor of the field's type.
    pub fn ops_for(&self, field: &Field) -> &[FilterOp] {
        for field_type in field.field_type().ancestry() {
            if let Some((_, ops)) = self.by_type.iter().find(|(t, _)| *t == field_type) {
                return ops;
            }
        }
        &[]
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        FilterTable::standard()
    }
}

/// One named operator bound to a field.
#[derive(Clone, Debug)]
pub struct Filter {
    pub name: Option<String>,
    pub op: FilterOp,
    pub field: Field,
    pub attribute: String,
}

fn is_date_like(field: &Field) -> bool {
    field.field_type().ancestry().any(|t| {
        matches!(
            t,
            FieldType::Date | FieldType::DateTime | FieldType::DateString | FieldType::DateTimeString
        )
    })
}

fn simplify(mut schema: Value) -> Value {
    if let Value::Object(map) = &mut schema {
        map.remove("readOnly");
    }
    schema
}

impl Filter {
    pub fn new(name: Option<&str>, op: FilterOp, field: Field, attribute: &str) -> Self {
        Filter {
            name: name.map(str::to_string),
            op,
            field,
            attribute: attribute.to_string(),
        }
    }

    /// Equality filter, used to look items up by property.
    pub fn equal(field: Field, attribute: &str) -> Self {
        Filter::new(None, FilterOp::Equal, field, attribute)
    }

    /// JSON-Schema for this operator's operand.
    pub fn operand_schema(&self, ctx: Context<'_>) -> Value {
        use FilterOp::*;
        let field_request = || simplify(self.field.request(ctx));
        match self.op {
            Equal | NotEqual => field_request(),
            LessThan | LessThanEqual | GreaterThan | GreaterThanEqual => {
                if is_date_like(&self.field) {
                    field_request()
                } else {
                    json!({"type": "number"})
                }
            }
            In => json!({"type": "array", "minItems": 0, "uniqueItems": true, "items": field_request()}),
            Contains => match self.field.container() {
                Some(container) => simplify(container.request(ctx)),
                None => json!({}),
            },
            StringContains | StringIContains | StartsWith | IStartsWith | EndsWith | IEndsWith => {
                json!({"type": "string", "minLength": 1})
            }
            Between => json!({"type": "array", "minItems": 2, "maxItems": 2, "items": field_request()}),
        }
    }

    /// Converts a validated operand into the backend value the condition compares with.
    pub async fn convert(&self, value: &Value, ctx: Context<'_>) -> Result<Value, ApiError> {
        use FilterOp::*;
        match self.op {
            Equal | NotEqual => self.field.convert_valid(value, ctx).await,
            LessThan | LessThanEqual | GreaterThan | GreaterThanEqual => {
                if is_date_like(&self.field) {
                    self.field.convert_valid(value, ctx).await
                } else {
                    Ok(value.clone())
                }
            }
            In | Between => {
                let Value::Array(items) = value else {
                    return Ok(value.clone());
                };
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(self.field.convert_valid(item, ctx).await.map_err(|e| e.prefixed(json!(index)))?);
                }
                Ok(Value::Array(out))
            }
            Contains => match self.field.container() {
                Some(container) => container.convert_valid(value, ctx).await,
                None => Ok(value.clone()),
            },
            _ => Ok(value.clone()),
        }
    }

    pub async fn condition(&self, value: &Value, ctx: Context<'_>) -> Result<Condition, ApiError> {
        Ok(Condition {
            attribute: self.attribute.clone(),
            filter: self.clone(),
            value: self.convert(value, ctx).await?,
        })
    }
}

/// Filters available on one field, keyed by wire name (`None` = implicit equality).
pub type FieldFilters = IndexMap<Option<String>, Filter>;

fn allowed_names(config: &FiltersConfig, key: &str) -> Option<Option<Vec<String>>> {
    // Some(None): every operator; Some(Some(names)): only these; None: no filters.
    match config {
        FiltersConfig::All(true) => Some(None),
        FiltersConfig::All(false) => None,
        FiltersConfig::Wildcard(w) if w == "*" => Some(None),
        FiltersConfig::Wildcard(_) => None,
        FiltersConfig::Fields(map) => match map.get(key).or_else(|| map.get("*")) {
            Some(FieldFilterConfig::All(true)) => Some(None),
            Some(FieldFilterConfig::Names(names)) => Some(Some(names.clone())),
            Some(FieldFilterConfig::All(false)) | None => None,
        },
    }
}

/// Derives the filters of every readable field from the operator table, narrowed by `config`.
pub fn filters_for_fields(
    fields: &FieldSet,
    config: &FiltersConfig,
    table: &FilterTable,
) -> Result<IndexMap<String, FieldFilters>, ConfigError> {
    if let FiltersConfig::Fields(map) = config {
        for key in map.keys() {
            if key != "*" && !fields.fields.contains_key(key) {
                return Err(ConfigError::MissingReference { kind: "filter field", id: key.clone() });
            }
        }
    }

    let mut out = IndexMap::new();
    for (key, field) in &fields.fields {
        if !field.io.read {
            continue;
        }
        let Some(restriction) = allowed_names(config, key) else {
            continue;
        };
        let mut filters = FieldFilters::new();
        for op in table.ops_for(field) {
            for name in op.names() {
                let allowed = match (&restriction, name) {
                    (None, _) => true,
                    (Some(names), None) => names.iter().any(|n| n == "eq"),
                    (Some(names), Some(n)) => names.iter().any(|allowed| allowed == n),
                };
                if allowed {
                    filters.insert(
                        name.map(str::to_string),
                        Filter::new(*name, *op, field.clone(), field.attribute_or(key)),
                    );
                }
            }
        }
        if !filters.is_empty() {
            out.insert(key.clone(), filters);
        }
    }
    Ok(out)
}

/// `where` schema for one field: the implicit-equality operand alone, or a
/// `oneOf` of it and an object holding exactly one named operator.
pub fn field_where_schema(filters: &FieldFilters, ctx: Context<'_>) -> Value {
    let mut named = Map::new();
    for (name, filter) in filters {
        if let Some(name) = name {
            named.insert(format!("${}", name), filter.operand_schema(ctx));
        }
    }
    let implicit = filters.get(&None).map(|f| f.operand_schema(ctx));
    if named.is_empty() {
        return implicit.unwrap_or_else(|| json!({}));
    }
    let object = json!({
        "type": "object",
        "properties": named,
        "minProperties": 1,
        "maxProperties": 1,
        "additionalProperties": false
    });
    match implicit {
        Some(implicit) => json!({"oneOf": [implicit, object]}),
        None => object,
    }
}

/// Converts one field's validated `where` value into a condition.
pub async fn convert_filters(value: &Value, filters: &FieldFilters, ctx: Context<'_>) -> Result<Condition, ApiError> {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some((key, operand)) = map.iter().next() {
                if let Some(name) = key.strip_prefix('$') {
                    if let Some(filter) = filters.get(&Some(name.to_string())) {
                        return filter.condition(operand, ctx).await;
                    }
                }
            }
        }
    }
    match filters.get(&None) {
        Some(filter) => filter.condition(value, ctx).await,
        None => Err(ApiError::validation(
            vec![],
            "filters",
            Value::Array(filters.keys().flatten().map(|n| json!(format!("${}", n))).collect()),
            "implicit equality is not allowed for this field",
        )),
    }
}
