mod common;

use axum::http::{Method, StatusCode};
use common::*;
use potion_rest::{Api, ApiConfig, SignalKind};
use std::time::Duration;
use serde_json::json;

#[tokio::test]
async fn book_lifecycle() {
    let router = library(ApiConfig::default());

    let jane = post(&router, "/author", json!({"name": "Jane"})).await;
    assert_eq!(jane.status, StatusCode::OK);
    assert_eq!(jane.body["$uri"], json!("/author/1"));
    assert_eq!(jane.body["name"], json!("Jane"));

    let created = post(&router, "/book", json!({"title": "Foo", "author": {"$ref": "/author/1"}})).await;
    assert_eq!(created.status, StatusCode::OK);
    assert_eq!(created.body["$uri"], json!("/book/1"));
    assert_eq!(created.body["author"], json!({"$ref": "/author/1"}));

    let by_id = post(&router, "/book", json!({"title": "Bar", "author": 1})).await;
    assert_eq!(by_id.status, StatusCode::OK);
    assert_eq!(by_id.body["author"], json!({"$ref": "/author/1"}));

    let read = get(&router, "/book/1").await;
    assert_eq!(read.status, StatusCode::OK);
    assert_eq!(read.body["title"], json!("Foo"));

    let updated = patch(&router, "/book/1", json!({"year": 1999})).await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["year"], json!(1999));
    assert_eq!(updated.body["title"], json!("Foo"));

    let gone = delete(&router, "/book/1").await;
    assert_eq!(gone.status, StatusCode::NO_CONTENT);
    assert!(gone.body.is_null());

    let again = delete(&router, "/book/1").await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
    assert_eq!(again.body["item"], json!({"$type": "book", "$id": 1}));
    assert_eq!(get(&router, "/book/1").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn third_page_of_forty_eight() {
    let router = library(ApiConfig::default());
    for i in 1..=48 {
        let reply = post(&router, "/author", json!({"name": format!("author {}", i)})).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let page = get(&router, "/author?page=3&per_page=20").await;
    assert_eq!(page.status, StatusCode::OK);
    let items = page.body.as_array().unwrap();
    assert_eq!(items.len(), 8);
    assert_eq!(items[0]["name"], json!("author 41"));
    assert_eq!(page.header("X-Total-Count"), Some("48"));
    assert_eq!(
        page.header("Link"),
        Some(
            "</author?page=3&per_page=20>; rel=\"self\", \
             </author?page=1&per_page=20>; rel=\"first\", \
             </author?page=2&per_page=20>; rel=\"prev\", \
             </author?page=3&per_page=20>; rel=\"last\""
        )
    );

    assert_eq!(get(&router, "/author?page=4&per_page=20").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/author?per_page=500").await.status, StatusCode::BAD_REQUEST);
    assert_eq!(get(&router, "/author?page=0").await.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_collection_has_one_page() {
    let router = library(ApiConfig::default());
    let page = get(&router, "/book").await;
    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(page.body, json!([]));
    assert_eq!(page.header("X-Total-Count"), Some("0"));
}

#[tokio::test]
async fn where_and_sort() {
    let router = library(ApiConfig::default());
    for (title, year) in [("A", 1990), ("B", 2005), ("C", 2010), ("D", 2001)] {
        post(&router, "/book", json!({"title": title, "year": year})).await;
    }
    let uri = format!(
        "/book?where={}&sort={}",
        encode(r#"{"year": {"$gt": 2000}}"#),
        encode(r#"{"year": true}"#)
    );
    let reply = get(&router, &uri).await;
    assert_eq!(reply.status, StatusCode::OK);
    let titles: Vec<&str> = reply.body.as_array().unwrap().iter().map(|b| b["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["C", "B", "D"]);

    let unknown = get(&router, &format!("/book?where={}", encode(r#"{"pages": 1}"#))).await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    let broken = get(&router, "/book?where=%7B").await;
    assert_eq!(broken.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_unique_value_conflicts() {
    let router = library(ApiConfig::default());
    assert_eq!(post(&router, "/book", json!({"title": "A", "isbn": "x"})).await.status, StatusCode::OK);
    let clash = post(&router, "/book", json!({"title": "B", "isbn": "x"})).await;
    assert_eq!(clash.status, StatusCode::CONFLICT);
    assert_eq!(clash.body["status"], json!(409));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_duplicates_conflict() {
    let slow = book().on(SignalKind::BeforeCreate, |_, _, _| {
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    });
    let mut api = Api::new(ApiConfig::default());
    api.add(author()).unwrap();
    api.add(slow).unwrap();
    let router = api.into_router().unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|n| {
            let router = router.clone();
            tokio::spawn(async move {
                post(&router, "/book", json!({"title": format!("copy {n}"), "isbn": "x"})).await.status.as_u16()
            })
        })
        .collect();
    let mut statuses = Vec::new();
    for task in tasks {
        statuses.push(task.await.unwrap());
    }
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 409]);
    assert_eq!(get(&router, "/book").await.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_required_field() {
    let router = library(ApiConfig::default());
    let reply = post(&router, "/book", json!({"year": 2000})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["errors"][0]["validationOf"]["required"], json!(["title"]));
    assert_eq!(reply.body["errors"][0]["path"], json!([]));
    assert!(reply.body["errors"][0].get("message").is_none());
}

#[tokio::test]
async fn reference_to_missing_item_is_not_found() {
    let router = library(ApiConfig::default());
    let reply = post(&router, "/book", json!({"title": "A", "author": {"$ref": "/author/9"}})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["item"], json!({"$type": "author", "$id": 9}));
}

#[tokio::test]
async fn request_errors() {
    let router = library(ApiConfig { max_body_bytes: 64, ..Default::default() });
    post(&router, "/author", json!({"name": "Jane"})).await;

    let text = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/author")
        .header("content-type", "text/plain")
        .body(axum::body::Body::from("name=Jane"))
        .unwrap();
    let reply = tower::ServiceExt::oneshot(router.clone(), text).await.unwrap();
    assert_eq!(reply.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let huge = post(&router, "/author", json!({"name": "x".repeat(200)})).await;
    assert_eq!(huge.status, StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(send(&router, Method::PUT, "/author/1", Some(json!({})), &[]).await.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(get(&router, "/nothing/here").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/author/abc").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prefixed_api() {
    let router = library(ApiConfig::default().with_prefix("/api/v1/"));
    let jane = post(&router, "/api/v1/author", json!({"name": "Jane"})).await;
    assert_eq!(jane.body["$uri"], json!("/api/v1/author/1"));
    let book = post(&router, "/api/v1/book", json!({"title": "A", "author": {"$ref": "/api/v1/author/1"}})).await;
    assert_eq!(book.status, StatusCode::OK);
    assert_eq!(book.body["author"], json!({"$ref": "/api/v1/author/1"}));
    assert_eq!(get(&router, "/author/1").await.status, StatusCode::NOT_FOUND);
}
