use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::web;

use super::support::{create_app, doc, TestApp};

fn router(app: &TestApp) -> Router {
    web::router(Arc::clone(&app.app))
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, req).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_is_public() {
    let app = create_app();
    let router = router(&app);
    let (status, body) = send_json(&router, request(Method::GET, "/api/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_requests_need_a_valid_token() {
    let app = create_app();
    let router = router(&app);

    let (status, body) = send_json(&router, request(Method::GET, "/api/pages", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send_json(
        &router,
        request(Method::GET, "/api/pages", Some("wrong-token"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send_json(
        &router,
        request(Method::GET, "/api/pages", Some("alice-token"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_page_lifecycle() {
    let app = create_app();
    let router = router(&app);
    let token = Some("alice-token");

    let (status, parent) = send_json(
        &router,
        request(
            Method::POST,
            "/api/pages",
            token,
            Some(json!({"title": "Fruit", "content": doc(&["apple", "banana"])})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parent["title"], "Fruit");
    assert_eq!(parent["userId"], "alice");
    let parent_id = parent["id"].as_u64().unwrap();

    let (_, child) = send_json(
        &router,
        request(
            Method::POST,
            "/api/pages",
            token,
            Some(json!({"title": "Berries", "parentId": parent_id})),
        ),
    )
    .await;
    let child_id = child["id"].as_u64().unwrap();

    let (status, page) = send_json(
        &router,
        request(Method::GET, &format!("/api/pages/{parent_id}"), token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["children"][0]["id"], child_id);

    let (status, blocks) = send_json(
        &router,
        request(Method::GET, &format!("/api/blocks?pageId={parent_id}"), token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(blocks.as_array().unwrap().len(), 2);
    assert_eq!(blocks[0]["type"], "paragraph");
    assert_eq!(blocks[1]["content"], "banana");

    let (status, renamed) = send_json(
        &router,
        request(
            Method::PATCH,
            &format!("/api/pages/{parent_id}"),
            token,
            Some(json!({"title": "Fruits"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["title"], "Fruits");

    let (status, moved) = send_json(
        &router,
        request(
            Method::POST,
            "/api/pages/move",
            token,
            Some(json!({"pageId": child_id, "newParentId": null})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["parentId"], Value::Null);

    let (status, reordered) = send_json(
        &router,
        request(
            Method::POST,
            "/api/pages/reorder",
            token,
            Some(json!({"pageId": child_id, "newOrder": 0})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reordered["order"], 0);

    let (status, body) = send_json(
        &router,
        request(Method::DELETE, &format!("/api/pages/{parent_id}"), token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = send_json(
        &router,
        request(Method::GET, &format!("/api/pages/{parent_id}"), token, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], format!("page {parent_id} not found"));
}

#[tokio::test]
async fn test_other_users_pages_are_not_found() {
    let app = create_app();
    let router = router(&app);

    let (_, page) = send_json(
        &router,
        request(Method::POST, "/api/pages", Some("alice-token"), Some(json!({}))),
    )
    .await;
    assert_eq!(page["title"], "Untitled");
    let id = page["id"].as_u64().unwrap();

    let (status, _) = send_json(
        &router,
        request(Method::GET, &format!("/api/pages/{id}"), Some("bob-token"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_block_endpoints() {
    let app = create_app();
    let router = router(&app);
    let token = Some("alice-token");

    let (_, page) = send_json(
        &router,
        request(Method::POST, "/api/pages", token, Some(json!({}))),
    )
    .await;
    let page_id = page["id"].as_u64().unwrap();

    let (status, block) = send_json(
        &router,
        request(
            Method::POST,
            "/api/blocks",
            token,
            Some(json!({
                "pageId": page_id,
                "type": "todo",
                "content": "buy apples",
                "checked": false,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(block["type"], "todo");
    assert_eq!(block["order"], 0);
    let block_id = block["id"].as_u64().unwrap();

    let (status, block) = send_json(
        &router,
        request(
            Method::PATCH,
            &format!("/api/blocks/{block_id}"),
            token,
            Some(json!({"checked": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(block["checked"], true);

    let (status, body) = send_json(&router, request(Method::GET, "/api/blocks", token, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "pageId is required");

    let (status, _) = send_json(
        &router,
        request(
            Method::POST,
            "/api/blocks",
            token,
            Some(json!({"pageId": page_id, "content": ""})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(
        &router,
        request(Method::DELETE, &format!("/api/blocks/{block_id}"), token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
}

#[tokio::test]
async fn test_search_endpoint() {
    let app = create_app();
    app.embedder.set("apple", super::support::axis(0));
    app.embedder.set("red fruit", super::support::axis(0));
    let router = router(&app);
    let token = Some("alice-token");

    send_json(
        &router,
        request(
            Method::POST,
            "/api/pages",
            token,
            Some(json!({"content": doc(&["apple", "banana"])})),
        ),
    )
    .await;

    let (status, matches) = send_json(
        &router,
        request(Method::POST, "/api/search", token, Some(json!({"query": "red fruit"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(matches.as_array().unwrap().len(), 1);
    assert_eq!(matches[0]["content"], "apple");
    assert_eq!(matches[0]["source"], "vector");

    let (status, _) = send_json(
        &router,
        request(Method::POST, "/api/search", token, Some(json!({"query": "  "}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_streams_plain_text() {
    let app = create_app();
    let router = router(&app);

    let response = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/chat",
            Some("alice-token"),
            Some(json!({
                "messages": [{"role": "user", "content": "こんにちは", "userId": "alice"}],
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()["x-chat-turn"].len(), 26);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(std::str::from_utf8(&body).unwrap(), "こんにちは");
}

#[tokio::test]
async fn test_chat_single_message_forms() {
    let app = create_app();
    let router = router(&app);

    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/api/chat",
            Some("alice-token"),
            Some(json!({"message": "りんご", "userId": "alice"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "こんにちは".as_bytes());

    let (status, body) = send(
        &router,
        request(
            Method::GET,
            "/api/chat?message=%E3%82%8A%E3%82%93%E3%81%94",
            Some("alice-token"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "こんにちは".as_bytes());

    let (status, _) = send(
        &router,
        request(Method::GET, "/api/chat", Some("alice-token"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_rejects_foreign_user_id() {
    let app = create_app();
    let router = router(&app);

    let (status, body) = send_json(
        &router,
        request(
            Method::POST,
            "/api/chat",
            Some("alice-token"),
            Some(json!({"message": "りんご", "userId": "bob"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("userId"));

    let (status, _) = send_json(
        &router,
        request(
            Method::POST,
            "/api/chat",
            Some("alice-token"),
            Some(json!({"messages": [{"role": "user", "content": "りんご", "userId": "bob"}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_chat_without_messages_is_bad_request() {
    let app = create_app();
    let router = router(&app);

    let (status, body) = send_json(
        &router,
        request(Method::POST, "/api/chat", Some("alice-token"), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no messages provided");
}
