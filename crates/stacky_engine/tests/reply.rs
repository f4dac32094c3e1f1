use pretty_assertions::assert_eq;
use serde_json::json;
use stacky_engine::{
    ApiTransport, FailureKind, HistoryEntry, HttpSettings, ReplyRequest, ReqwestStackyClient,
    StackyApi,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ReqwestStackyClient {
    let transport = ApiTransport::new(&HttpSettings::default()).unwrap();
    ReqwestStackyClient::new(&server.uri(), transport).unwrap()
}

#[tokio::test]
async fn reply_posts_message_and_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reply"))
        .and(body_json(json!({
            "message": "Where is my refund?",
            "conversationHistory": [
                {"text": "Hi", "sender": "user"},
                {"text": "Hello!", "sender": "assistant"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "On its way."})))
        .expect(1)
        .mount(&server)
        .await;

    let request = ReplyRequest {
        message: "Where is my refund?".into(),
        image_data: None,
        conversation_history: vec![
            HistoryEntry {
                text: "Hi".into(),
                sender: "user".into(),
                image: None,
            },
            HistoryEntry {
                text: "Hello!".into(),
                sender: "assistant".into(),
                image: None,
            },
        ],
    };
    let reply = client(&server).reply(&request).await.expect("reply");
    assert_eq!(reply, "On its way.");
}

#[tokio::test]
async fn reply_includes_image_data_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reply"))
        .and(body_json(json!({
            "message": "What is this?",
            "imageData": "data:image/png;base64,AAAA"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "A box."})))
        .mount(&server)
        .await;

    let request = ReplyRequest {
        message: "What is this?".into(),
        image_data: Some("data:image/png;base64,AAAA".into()),
        conversation_history: Vec::new(),
    };
    assert_eq!(client(&server).reply(&request).await.unwrap(), "A box.");
}

#[tokio::test]
async fn reply_error_uses_error_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reply"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"error": "Rate limit reached"})),
        )
        .mount(&server)
        .await;

    let request = ReplyRequest {
        message: "hi".into(),
        image_data: None,
        conversation_history: Vec::new(),
    };
    let error = client(&server).reply(&request).await.unwrap_err();
    assert_eq!(error.kind, FailureKind::HttpStatus(429));
    assert_eq!(error.message, "Rate limit reached");
}

#[tokio::test]
async fn empty_reply_is_a_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let request = ReplyRequest {
        message: "hi".into(),
        image_data: None,
        conversation_history: Vec::new(),
    };
    let error = client(&server).reply(&request).await.unwrap_err();
    assert_eq!(error.kind, FailureKind::Decode);
}

#[tokio::test]
async fn debug_login_succeeds_on_200_and_fails_on_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/debug/login"))
        .and(body_json(json!({"password": "open-sesame"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "Debug access granted"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/debug/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid password"})))
        .mount(&server)
        .await;

    let client = client(&server);
    client.debug_login("open-sesame").await.expect("granted");
    let error = client.debug_login("wrong").await.unwrap_err();
    assert_eq!(error.status(), Some(401));
    assert_eq!(error.message, "Invalid password");
}
