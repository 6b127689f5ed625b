//! Chat completions client against a mock server.

use std::time::Duration;

use medic::llm::{ChatCompletionsClient, ChatMessage, LlmError, TextGenerator};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ChatCompletionsClient {
    ChatCompletionsClient::new(
        &format!("{}/openai/v1/chat/completions", server.uri()),
        "gsk_test",
        "openai/gpt-oss-20b",
        Duration::from_secs(5),
    )
    .expect("client")
}

#[tokio::test]
async fn test_generate_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(header("authorization", "Bearer gsk_test"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-oss-20b",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server)
        .generate(&[ChatMessage::system("be brief"), ChatMessage::user("hello")])
        .await
        .expect("completion");
    assert_eq!(text, "hi");
}

#[tokio::test]
async fn test_api_error_message_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "tokens"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&[ChatMessage::user("hello")])
        .await
        .expect_err("rate limited");
    match err {
        LlmError::Api { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "Rate limit reached");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_choices_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&[ChatMessage::user("hello")])
        .await
        .expect_err("empty");
    assert!(matches!(err, LlmError::EmptyResponse));
}

#[test]
fn test_missing_key_rejected() {
    let result = ChatCompletionsClient::new(
        "http://localhost:1/chat/completions",
        "",
        "model",
        Duration::from_secs(1),
    );
    assert!(matches!(result, Err(LlmError::Config(_))));
}
