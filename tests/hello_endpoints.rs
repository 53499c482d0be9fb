use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use sampleapp::{
    AppState, GreetingClientError, GreetingService, build_router,
    fruits::InMemoryFruitRepository,
};
use serde_json::Value;
use tower::ServiceExt;

struct FixedGreeting(&'static str);

#[async_trait]
impl GreetingService for FixedGreeting {
    async fn hello(&self) -> Result<String, GreetingClientError> {
        Ok(self.0.to_string())
    }
}

fn app() -> axum::Router {
    build_router(AppState::new(
        Arc::new(FixedGreeting("Hi ")),
        Arc::new(InMemoryFruitRepository::seeded()),
    ))
}

async fn get(uri: &str) -> (StatusCode, Option<String>, String) {
    get_with(Request::builder().uri(uri)).await
}

async fn get_with(builder: axum::http::request::Builder) -> (StatusCode, Option<String>, String) {
    let response = app()
        .oneshot(builder.body(Body::empty()).expect("request should build"))
        .await
        .expect("response expected");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");

    (
        status,
        content_type,
        String::from_utf8(body.to_vec()).expect("body should be utf-8"),
    )
}

#[tokio::test]
async fn hello_returns_plain_text() {
    let (status, content_type, body) = get("/hello").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
    assert!(
        content_type
            .expect("content type should be set")
            .starts_with("text/plain")
    );
}

#[tokio::test]
async fn hello_ignores_query_and_headers() {
    let (status, _, body) = get_with(
        Request::builder()
            .uri("/hello?name=ignored&x=1")
            .header(header::ACCEPT, "application/json")
            .header("x-request-id", "abc"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn hello_json_contains_name() {
    let (status, content_type, body) = get("/hello/json").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert!(body.contains("Yamada"));
}

#[tokio::test]
async fn hello_json_fields() {
    let (_, _, body) = get("/hello/json").await;
    let json = serde_json::from_str::<Value>(&body).expect("body should be valid JSON");

    assert_eq!(json["age"], 20);
    assert!(json["age"].as_u64().expect("age is a number") < 30);
    assert!(
        !json["birthdate"]
            .as_str()
            .expect("birthdate is a string")
            .is_empty()
    );
    assert!(
        json["name"]
            .as_str()
            .expect("name is a string")
            .eq_ignore_ascii_case("yamada")
    );
    assert!(json.get("gender").is_none());
}

#[tokio::test]
async fn hello_json_is_exact() {
    let (_, _, body) = get("/hello/json").await;
    let json = serde_json::from_str::<Value>(&body).expect("body should be valid JSON");

    assert_eq!(
        json,
        serde_json::json!({"name": "Yamada", "age": 20, "birthdate": "2000/12/25"})
    );
}

#[tokio::test]
async fn unrouted_hello_subpath_is_not_found() {
    for uri in ["/hello/404", "/hello/json/extra", "/hello/anything"] {
        let (status, _, _) = get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn live_helloext_answers_hello() {
    let (status, content_type, body) = get("/helloext").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello ");
    assert!(
        content_type
            .expect("content type should be set")
            .starts_with("text/plain")
    );
}
