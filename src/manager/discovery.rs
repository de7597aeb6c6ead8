//! Field discovery from backend model declarations.

use crate::config::{ColumnConfig, ColumnTypeConfig, ModelDefinition, ResourceConfig};
use crate::error::ConfigError;
use crate::fields::{Field, ObjectField, StringOptions};
use crate::schema::FieldSet;
use serde_json::json;

/// Merges discovered columns under the explicit fields.
///
/// Primary and foreign key columns are skipped, as is every column an explicit
/// field already maps to. Of the rest, `include_fields` (when set) selects,
/// otherwise `exclude_fields` removes. Runs once, while the resource is built.
pub fn discover_fields(
    model: &ModelDefinition,
    config: &ResourceConfig,
    explicit: &FieldSet,
) -> Result<FieldSet, ConfigError> {
    let claimed: Vec<&str> = explicit
        .fields
        .iter()
        .map(|(key, field)| field.attribute_or(key))
        .chain(explicit.fields.keys().map(String::as_str))
        .collect();

    let mut discovered = FieldSet::new();
    for column in &model.columns {
        if column.name == model.primary_key || column.foreign_key.is_some() || claimed.contains(&column.name.as_str()) {
            continue;
        }
        let selected = match &config.include_fields {
            Some(include) => include.contains(&column.name),
            None => !config.exclude_fields.contains(&column.name),
        };
        if !selected {
            continue;
        }
        let mut field = column_field(&column.type_, column)?;
        if column.nullable {
            field = field.nullable();
        }
        discovered.insert(&column.name, field);
        if !column.nullable && column.default.is_some() {
            discovered.set_optional(&column.name);
        }
    }
    tracing::debug!(
        table = %model.table,
        discovered = discovered.fields.len(),
        explicit = explicit.fields.len(),
        "discovered fields"
    );
    discovered.extend(explicit);
    Ok(discovered)
}

fn split_params(name: &str) -> (String, Option<u64>) {
    let lower = name.trim().to_lowercase();
    match (lower.find('('), lower.ends_with(')')) {
        (Some(open), true) => {
            let n = lower[open + 1..lower.len() - 1].split(',').next().and_then(|p| p.trim().parse().ok());
            (lower[..open].trim().to_string(), n)
        }
        _ => (lower, None),
    }
}

fn column_field(ty: &ColumnTypeConfig, column: &ColumnConfig) -> Result<Field, ConfigError> {
    let (name, inline_len) = split_params(ty.name());
    let length = ty.params().first().map(|n| u64::from(*n)).or(inline_len);
    type_field(&name, length).ok_or_else(|| {
        ConfigError::InvalidField(format!("column '{}' has unsupported type '{}'", column.name, ty.name()))
    })
}

fn type_field(name: &str, length: Option<u64>) -> Option<Field> {
    if let Some(element) = name.strip_suffix("[]") {
        return type_field(element.trim(), None).map(Field::array);
    }
    let field = match name {
        "text" | "citext" => Field::string(),
        "varchar" | "character varying" | "char" | "character" | "bpchar" => {
            Field::string_with(StringOptions { max_length: length, ..Default::default() })
        }
        "uuid" => Field::uuid(),
        "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "smallserial" | "serial"
        | "bigserial" | "serial4" | "serial8" => Field::integer(),
        "real" | "float4" | "float8" | "double precision" | "numeric" | "decimal" => Field::number(),
        "bool" | "boolean" => Field::boolean(),
        "date" => Field::date(),
        "timestamp" | "timestamptz" | "timestamp with time zone" | "timestamp without time zone" => Field::date_time(),
        "json" | "jsonb" => Field::raw(json!({})),
        "hstore" => Field::object(ObjectField::values(Field::string())),
        // Schema-qualified enum types travel as their text labels.
        custom if custom.contains('.') => Field::string(),
        _ => return None,
    };
    Some(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldKind, FieldType};

    fn model() -> ModelDefinition {
        serde_json::from_value(json!({
            "table": "book",
            "columns": [
                {"name": "id", "type": "serial", "nullable": false},
                {"name": "title", "type": "varchar(120)", "nullable": false},
                {"name": "year_published", "type": "integer", "nullable": false},
                {"name": "rating", "type": "numeric"},
                {"name": "pages", "type": "integer", "nullable": false, "default": 100},
                {"name": "tags", "type": "text[]"},
                {"name": "author_id", "type": "integer", "foreign_key": {"table": "author"}},
                {"name": "secret", "type": "text"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn discovers_columns_and_required_flags() {
        let mut config = ResourceConfig::named("book");
        config.exclude_fields = vec!["secret".into()];
        let fields = discover_fields(&model(), &config, &FieldSet::new()).unwrap();
        let keys: Vec<&str> = fields.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "year_published", "rating", "pages", "tags"]);
        let required: Vec<String> = fields.required().into_iter().collect();
        assert_eq!(required, vec!["title", "year_published"]);
        assert!(matches!(
            fields.get("title").map(|f| &f.kind),
            Some(FieldKind::String(StringOptions { max_length: Some(120), .. }))
        ));
        assert_eq!(fields.get("tags").map(|f| f.field_type()), Some(FieldType::Array));
        assert!(fields.get("rating").map(|f| f.nullable).unwrap_or(false));
    }

    #[test]
    fn explicit_fields_take_precedence() {
        let mut config = ResourceConfig::named("book");
        config.include_fields = Some(vec!["title".into(), "secret".into()]);
        config.exclude_fields = vec!["secret".into()];
        let explicit = FieldSet::new().field("name", Field::string().attribute("title"));
        let fields = discover_fields(&model(), &config, &explicit).unwrap();
        let keys: Vec<&str> = fields.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["secret", "name"]);
    }

    #[test]
    fn unknown_types_are_rejected() {
        let model: ModelDefinition = serde_json::from_value(json!({
            "table": "t",
            "columns": [{"name": "id", "type": "serial"}, {"name": "shape", "type": "polygon"}]
        }))
        .unwrap();
        assert!(discover_fields(&model, &ResourceConfig::named("t"), &FieldSet::new()).is_err());
    }
}
