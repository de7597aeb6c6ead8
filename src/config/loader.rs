//! Load api settings from the environment and model declarations from JSON files.

use crate::config::types::{ApiConfig, ModelDefinition};
use crate::config::validator::{validate_api_config, validate_model};
use crate::error::ConfigError;
use std::path::Path;
use std::str::FromStr;

impl ApiConfig {
    /// Reads `API_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ApiConfig::default();
        if let Some(prefix) = env_var("API_PREFIX") {
            config.prefix = normalize_prefix(&prefix);
        }
        config.title = env_var("API_TITLE");
        config.description = env_var("API_DESCRIPTION");
        if let Some(n) = env_parse("API_DEFAULT_PER_PAGE")? {
            config.default_per_page = n;
        }
        if let Some(n) = env_parse("API_MAX_PER_PAGE")? {
            config.max_per_page = n;
        }
        if let Some(debug) = env_var("API_DEBUG") {
            config.debug = parse_flag("API_DEBUG", &debug)?;
        }
        if let Some(n) = env_parse("API_MAX_BODY_BYTES")? {
            config.max_body_bytes = n;
        }
        validate_api_config(&config)?;
        Ok(config)
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(None),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Validation(format!("{} has invalid value '{}'", name, raw))),
    }
}

/// `"api/"`, `"/api"` and `"/api/"` all become `"/api"`; `"/"` becomes `""`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Parses one JSON document holding a model or an array of models.
pub fn load_models_from_str(raw: &str) -> Result<Vec<ModelDefinition>, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
    let models: Vec<ModelDefinition> = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|m| vec![m])
    }
    .map_err(|e| ConfigError::Load(e.to_string()))?;
    for model in &models {
        validate_model(model)?;
    }
    Ok(models)
}

/// Loads every `*.json` file of `dir`, in file-name order.
pub async fn load_models_from_dir(dir: impl AsRef<Path>) -> Result<Vec<ModelDefinition>, ConfigError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| ConfigError::Load(e.to_string()))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut models = Vec::new();
    for path in paths {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let loaded = load_models_from_str(&raw)?;
        tracing::debug!(path = %path.display(), models = loaded.len(), "loaded model declarations");
        models.extend(loaded);
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_normalize() {
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn flags_parse() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }

    #[test]
    fn single_and_many_models() {
        let one = r#"{"table": "author", "columns": [{"name": "id", "type": "serial"}]}"#;
        assert_eq!(load_models_from_str(one).unwrap().len(), 1);
        let many = r#"[{"table": "a", "columns": [{"name": "id", "type": "serial"}]},
                       {"table": "b", "columns": [{"name": "id", "type": "uuid"}]}]"#;
        assert_eq!(load_models_from_str(many).unwrap().len(), 2);
        assert!(matches!(load_models_from_str("{"), Err(ConfigError::Load(_))));
    }

    #[tokio::test]
    async fn missing_dir_is_a_load_error() {
        assert!(matches!(
            load_models_from_dir("/nonexistent/potion-models").await,
            Err(ConfigError::Load(_))
        ));
    }
}
