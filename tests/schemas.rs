mod common;

use axum::http::StatusCode;
use common::*;
use potion_rest::{Api, ApiConfig, Field, ItemAttributeRoute, Relation};
use serde_json::{json, Value};

fn rels(schema: &Value) -> Vec<&str> {
    schema["links"].as_array().unwrap().iter().map(|l| l["rel"].as_str().unwrap()).collect()
}

fn link<'a>(schema: &'a Value, rel: &str) -> &'a Value {
    schema["links"].as_array().unwrap().iter().find(|l| l["rel"] == json!(rel)).unwrap()
}

#[tokio::test]
async fn api_schema_references_every_resource() {
    let router = library(ApiConfig { title: Some("Library".into()), ..Default::default() }.with_prefix("/api"));
    let reply = get(&router, "/api/schema").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), Some("application/schema+json"));
    assert_eq!(
        reply.body,
        json!({
            "$schema": "http://json-schema.org/draft-04/hyper-schema#",
            "title": "Library",
            "properties": {
                "author": {"$ref": "/api/author/schema#"},
                "book": {"$ref": "/api/book/schema#"}
            }
        })
    );
}

#[tokio::test]
async fn resource_schema_describes_fields_and_links() {
    let router = library(ApiConfig::default());
    let reply = get(&router, "/book/schema").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), Some("application/schema+json"));
    let schema = &reply.body;
    assert_eq!(schema["$schema"], json!("http://json-schema.org/draft-04/hyper-schema#"));
    assert_eq!(schema["type"], json!("object"));
    assert_eq!(schema["properties"]["$uri"]["readOnly"], json!(true));
    assert_eq!(schema["properties"]["author"]["type"], json!(["object", "null"]));
    assert_eq!(schema["properties"]["author"]["properties"]["$ref"]["pattern"], json!("^/author/[^/]+$"));

    assert_eq!(rels(schema), vec!["create", "describedBy", "destroy", "instances", "self", "update"]);
    assert_eq!(link(schema, "self")["href"], json!("/book/{id}"));
    assert_eq!(link(schema, "self")["method"], json!("GET"));
    assert_eq!(link(schema, "instances")["href"], json!("/book"));
    assert_eq!(link(schema, "instances")["targetSchema"], json!({"type": "array", "items": {"$ref": "#"}}));
    assert_eq!(link(schema, "create")["schema"]["required"], json!(["title"]));
    assert!(link(schema, "destroy").get("schema").is_none());
}

#[tokio::test]
async fn relation_and_attribute_links() {
    let mut api = Api::new(ApiConfig::default());
    api.add(author()).unwrap();
    api.add(
        book()
            .relation(Relation::new("authors", "author"))
            .item_attribute(ItemAttributeRoute::new("rating", Field::integer())),
    )
    .unwrap();
    let router = api.into_router().unwrap();
    let schema = get(&router, "/book/schema").await.body;

    assert_eq!(
        rels(&schema),
        vec![
            "addAuthors",
            "authors",
            "create",
            "describedBy",
            "destroy",
            "instances",
            "readRating",
            "removeAuthors",
            "self",
            "update",
            "updateRating"
        ]
    );
    assert_eq!(link(&schema, "authors")["href"], json!("/book/{id}/authors"));
    assert_eq!(link(&schema, "removeAuthors")["href"], json!("/book/{id}/authors/{target_id}"));
    assert_eq!(link(&schema, "removeAuthors")["method"], json!("DELETE"));
    assert_eq!(link(&schema, "updateRating")["method"], json!("POST"));
    assert_eq!(link(&schema, "readRating")["targetSchema"]["type"], json!("integer"));
}

#[tokio::test]
async fn debug_mode_pretty_prints() {
    let router = library(ApiConfig { debug: true, ..Default::default() });
    let request = axum::http::Request::builder()
        .uri("/schema")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(router, request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.contains(&b'\n'));
}
