#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use potion_rest::{Api, ApiConfig, Field, MemoryBackend, ResourceDefinition};
use serde_json::Value;
use tower::ServiceExt;

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends one request through a clone of `router`. Empty bodies become `Null`, non-JSON ones a string.
pub async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>, extra: &[(&str, &str)]) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Reply { status, headers, body }
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    send(router, Method::GET, uri, None, &[]).await
}

pub async fn post(router: &Router, uri: &str, body: Value) -> Reply {
    send(router, Method::POST, uri, Some(body), &[]).await
}

pub async fn patch(router: &Router, uri: &str, body: Value) -> Reply {
    send(router, Method::PATCH, uri, Some(body), &[]).await
}

pub async fn delete(router: &Router, uri: &str) -> Reply {
    send(router, Method::DELETE, uri, None, &[]).await
}

/// Percent-encodes a query value.
pub fn encode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

pub fn author() -> ResourceDefinition {
    ResourceDefinition::named("author")
        .field("name", Field::string())
        .field("born", Field::integer().nullable())
}

pub fn book() -> ResourceDefinition {
    ResourceDefinition::named("book")
        .manager(MemoryBackend::new().unique("isbn"))
        .field("title", Field::string())
        .field("year", Field::integer().nullable())
        .field("isbn", Field::string().nullable())
        .field("author", Field::to_one("author").nullable())
}

/// Router over the `author` and `book` resources.
pub fn library(config: ApiConfig) -> Router {
    let mut api = Api::new(config);
    api.add(author()).unwrap();
    api.add(book()).unwrap();
    api.into_router().unwrap()
}
