//! Model declarations flattened for SQL generation.

use crate::config::types::{ColumnTypeConfig, ModelDefinition};
use crate::config::validator::validate_model;
use crate::error::ConfigError;

/// Primary key type for parsing path ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    pub has_default: bool,
    /// Selected as `float8` so every numeric comes back as a JSON number.
    pub numeric: bool,
    /// Type every bound value is cast to (`integer`, `varchar(120)`, `text[]`).
    pub sql_type: String,
}

#[derive(Clone, Debug)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
    pub pk: String,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
}

impl ColumnInfo {
    /// Schema-qualified enum types are read back as their text labels.
    pub fn is_custom_type(&self) -> bool {
        self.sql_type.contains('.')
    }

    pub fn is_array(&self) -> bool {
        self.sql_type.ends_with("[]")
    }
}

impl TableInfo {
    /// `"schema"."table"`
    pub fn qualified(&self) -> String {
        qualified(&self.schema, &self.table)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Validates the model and derives the table info used by the SQL layer.
pub fn resolve_table(model: &ModelDefinition) -> Result<TableInfo, ConfigError> {
    validate_model(model)?;
    let pk_col = model.column(&model.primary_key).ok_or_else(|| ConfigError::InvalidPrimaryKey {
        table: model.table.clone(),
        column: model.primary_key.clone(),
    })?;
    let columns = model
        .columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name.clone(),
            nullable: c.nullable,
            has_default: c.default.is_some() || is_serial(&c.type_),
            numeric: is_numeric(&c.type_),
            sql_type: cast_type(&c.type_),
        })
        .collect();
    Ok(TableInfo {
        schema: model.schema.clone(),
        table: model.table.clone(),
        pk: model.primary_key.clone(),
        pk_type: infer_pk_type(&pk_col.type_),
        columns,
    })
}

/// Declared type usable in a cast: serial pseudo-types map to their integer types.
pub(crate) fn cast_type(ty: &ColumnTypeConfig) -> String {
    let name = ty.name().trim();
    let base = match name.to_lowercase().as_str() {
        "serial" | "serial4" => "integer".to_string(),
        "bigserial" | "serial8" => "bigint".to_string(),
        "smallserial" | "serial2" => "smallint".to_string(),
        _ => name.to_string(),
    };
    match ty.params() {
        [] => base,
        params => format!(
            "{}({})",
            base,
            params.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        ),
    }
}

fn is_serial(ty: &ColumnTypeConfig) -> bool {
    ty.name().to_lowercase().contains("serial")
}

fn is_numeric(ty: &ColumnTypeConfig) -> bool {
    matches!(
        ty.name().to_lowercase().as_str(),
        "numeric" | "decimal" | "real" | "float4" | "float8" | "double precision"
    )
}

pub(crate) fn infer_pk_type(ty: &ColumnTypeConfig) -> PkType {
    let type_lower = ty.name().to_lowercase();
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("integer") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_pk_and_casts() {
        let model: ModelDefinition = serde_json::from_value(json!({
            "table": "event",
            "primary_key": "uid",
            "columns": [
                {"name": "uid", "type": "uuid", "nullable": false, "default": {"expression": "gen_random_uuid()"}},
                {"name": "at", "type": "timestamp with time zone"},
                {"name": "score", "type": "numeric"}
            ]
        }))
        .unwrap();
        let table = resolve_table(&model).unwrap();
        assert_eq!(table.pk_type, PkType::Uuid);
        assert_eq!(table.qualified(), "\"public\".\"event\"");
        assert_eq!(table.column("at").map(|c| c.sql_type.as_str()), Some("timestamp with time zone"));
        assert!(table.column("score").map(|c| c.numeric).unwrap_or(false));
        assert!(table.column("uid").map(|c| c.has_default).unwrap_or(false));
        assert_eq!(table.column("score").map(|c| c.sql_type.as_str()), Some("numeric"));
    }

    #[test]
    fn serial_columns_cast_to_integers() {
        assert_eq!(cast_type(&ColumnTypeConfig::Simple("serial".into())), "integer");
        assert_eq!(cast_type(&ColumnTypeConfig::Simple("BIGSERIAL".into())), "bigint");
        let varchar = ColumnTypeConfig::Parameterized { name: "varchar".into(), params: Some(vec![120]) };
        assert_eq!(cast_type(&varchar), "varchar(120)");
    }

    #[test]
    fn missing_pk_column_is_rejected() {
        let model: ModelDefinition = serde_json::from_value(json!({
            "table": "t",
            "columns": [{"name": "name", "type": "text"}]
        }))
        .unwrap();
        assert!(matches!(resolve_table(&model), Err(ConfigError::InvalidPrimaryKey { .. })));
    }
}
