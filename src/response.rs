//! JSON response rendering.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const SCHEMA_CONTENT_TYPE: &str = "application/schema+json";

/// Serializes `body`; pretty-printed in debug mode.
pub fn json_response(status: StatusCode, body: &Value, content_type: &'static str, debug: bool) -> Response {
    let bytes = if debug {
        serde_json::to_vec_pretty(body)
    } else {
        serde_json::to_vec(body)
    };
    match bytes {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))], bytes).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn ok(body: &Value, debug: bool) -> Response {
    json_response(StatusCode::OK, body, JSON_CONTENT_TYPE, debug)
}

pub fn schema(body: &Value, debug: bool) -> Response {
    json_response(StatusCode::OK, body, SCHEMA_CONTENT_TYPE, debug)
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
