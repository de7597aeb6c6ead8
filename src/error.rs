//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Errors raised while declaring, registering or resolving resources.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("resource name '{0}' is already registered by a different resource")]
    DuplicateResource(String),
    #[error("resource named '{0}' is not registered with the api")]
    UnresolvedReference(String),
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table} column {column}")]
    InvalidPrimaryKey { table: String, column: String },
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("circular permissions in {resource} (path: {path})")]
    CircularPermissions { resource: String, path: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// One failed JSON-Schema keyword, located by its path in the instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationIssue {
    pub path: Vec<Value>,
    pub validator: String,
    pub validator_value: Value,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: Vec<Value>, validator: &str, validator_value: Value, message: impl Into<String>) -> Self {
        ValidationIssue {
            path,
            validator: validator.to_string(),
            validator_value,
            message: message.into(),
        }
    }

    fn to_json(&self, debug: bool) -> Value {
        let mut validation_of = Map::new();
        validation_of.insert(self.validator.clone(), self.validator_value.clone());
        let mut out = Map::new();
        out.insert("validationOf".into(), Value::Object(validation_of));
        out.insert("path".into(), Value::Array(self.path.clone()));
        if debug {
            out.insert("message".into(), Value::String(self.message.clone()));
        }
        Value::Object(out)
    }
}

/// How an item that could not be found was looked up.
#[derive(Clone, Debug, PartialEq)]
pub enum LookupKey {
    Id(Value),
    Where(Value),
    Unknown,
}

/// Request-time errors. Each variant maps onto exactly one HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationIssue>),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("request must be JSON")]
    RequestMustBeJson,
    #[error("{resource} item not found")]
    ItemNotFound { resource: String, key: LookupKey },
    #[error("page not found")]
    PageNotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("forbidden")]
    Forbidden,
    #[error("duplicate key")]
    DuplicateKey { detail: Option<String> },
    #[error("backend conflict")]
    BackendConflict { debug_info: Option<Value> },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found_id(resource: &str, id: Value) -> Self {
        ApiError::ItemNotFound {
            resource: resource.to_string(),
            key: LookupKey::Id(id),
        }
    }

    pub fn not_found_where(resource: &str, where_: Value) -> Self {
        ApiError::ItemNotFound {
            resource: resource.to_string(),
            key: LookupKey::Where(where_),
        }
    }

    pub fn validation(path: Vec<Value>, validator: &str, validator_value: Value, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![ValidationIssue::new(path, validator, validator_value, message)])
    }

    /// Prepends `segment` to the path of every validation issue; other errors pass through.
    pub fn prefixed(self, segment: Value) -> Self {
        match self {
            ApiError::Validation(issues) => ApiError::Validation(
                issues
                    .into_iter()
                    .map(|mut issue| {
                        issue.path.insert(0, segment.clone());
                        issue
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::RequestMustBeJson => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ItemNotFound { .. } | ApiError::PageNotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::DuplicateKey { .. } | ApiError::BackendConflict { .. } => StatusCode::CONFLICT,
            ApiError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error body: `{"status", "message", ...}`. Debug-only details are dropped unless `debug`.
    pub fn to_body(&self, debug: bool) -> Value {
        let status = self.status_code();
        let mut body = Map::new();
        body.insert("status".into(), json!(status.as_u16()));
        body.insert(
            "message".into(),
            Value::String(status.canonical_reason().unwrap_or("").to_string()),
        );
        match self {
            ApiError::Validation(issues) => {
                body.insert(
                    "errors".into(),
                    Value::Array(issues.iter().map(|i| i.to_json(debug)).collect()),
                );
            }
            ApiError::ItemNotFound { resource, key } => match key {
                LookupKey::Id(id) => {
                    body.insert("item".into(), json!({ "$type": resource, "$id": id }));
                }
                LookupKey::Where(where_) => {
                    body.insert("item".into(), json!({ "$type": resource, "$where": where_ }));
                }
                LookupKey::Unknown => {}
            },
            ApiError::DuplicateKey { detail } => {
                if let Some(detail) = detail {
                    body.insert("detail".into(), Value::String(detail.clone()));
                }
            }
            ApiError::BackendConflict { debug_info } => {
                if let (true, Some(info)) = (debug, debug_info) {
                    body.insert("debug_info".into(), info.clone());
                }
            }
            _ => {
                if debug && status == StatusCode::INTERNAL_SERVER_ERROR {
                    body.insert("debug_info".into(), Value::String(self.to_string()));
                }
            }
        }
        Value::Object(body)
    }

    /// Response rendering used by the route dispatcher, which knows whether the api runs in debug mode.
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(self.to_body(debug))).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_body_hides_messages_outside_debug() {
        let err = ApiError::validation(vec![], "required", json!(["title"]), "'title' is a required property");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_body(false),
            json!({
                "status": 400,
                "message": "Bad Request",
                "errors": [{"validationOf": {"required": ["title"]}, "path": []}]
            })
        );
        let debug = err.to_body(true);
        assert_eq!(debug["errors"][0]["message"], json!("'title' is a required property"));
    }

    #[test]
    fn not_found_body_names_the_item() {
        let err = ApiError::not_found_id("book", json!(1));
        assert_eq!(
            err.to_body(false),
            json!({"status": 404, "message": "Not Found", "item": {"$type": "book", "$id": 1}})
        );
    }

    #[test]
    fn prefixed_extends_issue_paths() {
        let err = ApiError::validation(vec![json!(0)], "type", json!("integer"), "not an integer").prefixed(json!("tags"));
        match err {
            ApiError::Validation(issues) => assert_eq!(issues[0].path, vec![json!("tags"), json!(0)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(ApiError::DuplicateKey { detail: None }.status_code(), StatusCode::CONFLICT);
        let conflict = ApiError::BackendConflict { debug_info: Some(json!({"statement": "INSERT"})) };
        assert!(conflict.to_body(false).get("debug_info").is_none());
        assert_eq!(conflict.to_body(true)["debug_info"], json!({"statement": "INSERT"}));
    }
}
