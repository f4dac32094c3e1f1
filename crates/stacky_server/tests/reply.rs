use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stacky_server::completion::SYSTEM_PROMPT;
use stacky_server::{router, AppState, ServerConfig};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(openai: &MockServer) -> Router {
    let mut config = ServerConfig::from_lookup(|_| None).unwrap();
    config.openai_api_key = Some("sk-test".into());
    config.openai_base_url = openai.uri();
    router(AppState::new(config))
}

async fn post(app: Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/reply")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn completion(content: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

#[tokio::test]
async fn forwards_conversation_to_completion_api() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 1000,
            "stream": false,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello! How can I help?"},
                {"role": "user", "content": [
                    {"type": "text", "text": "Is this damaged?"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAAA"}}
                ]}
            ]
        })))
        .respond_with(completion(json!("Yes, the corner is crushed.")))
        .expect(1)
        .mount(&openai)
        .await;

    let (status, body) = post(
        app(&openai),
        json!({
            "message": "Is this damaged?",
            "imageData": "data:image/jpeg;base64,AAAA",
            "conversationHistory": [
                {"text": "Hi", "sender": "user"},
                {"text": "Hello! How can I help?", "sender": "assistant"}
            ]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"reply": "Yes, the corner is crushed."}));
}

#[tokio::test]
async fn missing_message_is_rejected_without_upstream_call() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(json!("unused")))
        .expect(0)
        .mount(&openai)
        .await;

    let (status, body) = post(app(&openai), json!({"conversationHistory": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Message is required"}));
}

#[tokio::test]
async fn upstream_status_is_passed_through() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&openai)
        .await;

    let (status, body) = post(app(&openai), json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"error": "Failed to get AI response"}));
}

#[tokio::test]
async fn empty_completion_is_a_server_error() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(Value::Null))
        .mount(&openai)
        .await;

    let (status, body) = post(app(&openai), json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "No response from AI"}));
}

#[tokio::test]
async fn other_methods_get_405() {
    let openai = MockServer::start().await;
    let request = Request::builder()
        .method("GET")
        .uri("/api/reply")
        .body(Body::empty())
        .unwrap();
    let response = app(&openai).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
