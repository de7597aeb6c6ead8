//! Config validation: referential integrity of models and resource options.

use crate::config::types::{ApiConfig, ModelDefinition, NaturalKeyConfig, RelationshipConfig, ResourceConfig};
use crate::error::ConfigError;
use crate::schema::FieldSet;
use std::collections::HashSet;

pub fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    if config.default_per_page == 0 || config.max_per_page == 0 {
        return Err(ConfigError::Validation("per_page limits must be positive".into()));
    }
    if config.default_per_page > config.max_per_page {
        return Err(ConfigError::Validation(format!(
            "default_per_page ({}) exceeds max_per_page ({})",
            config.default_per_page, config.max_per_page
        )));
    }
    if !config.prefix.is_empty() && (!config.prefix.starts_with('/') || config.prefix.ends_with('/')) {
        return Err(ConfigError::Validation(format!("invalid prefix '{}'", config.prefix)));
    }
    Ok(())
}

pub fn validate_model(model: &ModelDefinition) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for c in &model.columns {
        if !names.insert(c.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate column '{}' in table {}",
                c.name, model.table
            )));
        }
    }
    if !names.contains(model.primary_key.as_str()) {
        return Err(ConfigError::InvalidPrimaryKey {
            table: model.table.clone(),
            column: model.primary_key.clone(),
        });
    }
    for set in &model.unique {
        for column in set {
            if !names.contains(column.as_str()) {
                return Err(ConfigError::MissingReference { kind: "unique column", id: column.clone() });
            }
        }
    }
    for c in &model.columns {
        if let Some(fk) = &c.foreign_key {
            if fk.table.is_empty() {
                return Err(ConfigError::MissingReference { kind: "foreign key table", id: c.name.clone() });
            }
        }
    }
    let mut attributes = HashSet::new();
    for r in &model.relationships {
        if !attributes.insert(r.attribute()) || names.contains(r.attribute()) {
            return Err(ConfigError::Validation(format!(
                "relationship attribute '{}' clashes in table {}",
                r.attribute(),
                model.table
            )));
        }
        if let RelationshipConfig::ManyToMany { source_column, target_column, .. } = r {
            if source_column == target_column {
                return Err(ConfigError::Validation(format!(
                    "relationship '{}' uses '{}' for both sides",
                    r.attribute(),
                    source_column
                )));
            }
        }
    }
    Ok(())
}

/// Checks every field named by the resource options against the final field set.
pub fn validate_resource_config(config: &ResourceConfig, fields: &FieldSet) -> Result<(), ConfigError> {
    let check = |kind: &'static str, key: &str| {
        if fields.contains(key) {
            Ok(())
        } else {
            Err(ConfigError::MissingReference { kind, id: format!("{}.{}", config.name, key) })
        }
    };
    for key in &config.read_only_fields {
        check("read-only field", key)?;
    }
    for key in &config.write_only_fields {
        check("write-only field", key)?;
        if config.read_only_fields.contains(key) {
            return Err(ConfigError::InvalidField(format!(
                "{}.{} cannot be both read-only and write-only",
                config.name, key
            )));
        }
    }
    for key in &config.required_fields {
        check("required field", key)?;
    }
    for natural_key in &config.natural_keys {
        match natural_key {
            NaturalKeyConfig::Property(key) => check("natural key", key)?,
            NaturalKeyConfig::Properties(keys) => {
                if keys.is_empty() {
                    return Err(ConfigError::InvalidField(format!("{}: empty natural key", config.name)));
                }
                for key in keys {
                    check("natural key", key)?;
                }
            }
        }
    }
    if let Some(sort) = &config.sort_attribute {
        check("sort attribute", sort)?;
    }
    Ok(())
}
