use serde_json::json;
use std::time::Duration;
use wikidef::completion::{ChatClient, ChatConfig, Completer};
use wikidef::error::CompletionError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

fn client(base_url: String, timeout: Duration) -> ChatClient {
    ChatClient::new(ChatConfig {
        api_key: "sk-test".to_string(),
        base_url,
        primary_model: "primary".to_string(),
        fallback_model: "fallback".to_string(),
        temperature: 0.3,
        timeout,
    })
    .unwrap()
}

fn chat_json(content: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

fn sse(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": part } }] })
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn strategy(model: &str, stream: bool) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": model, "stream": stream })))
}

#[tokio::test]
async fn primary_json_wins_first() {
    let server = MockServer::start().await;
    strategy("primary", false)
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_json("  X  ")))
        .expect(1)
        .mount(&server)
        .await;
    strategy("primary", true)
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&["no"]), "text/event-stream"))
        .expect(0)
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_secs(5))
        .complete("define X")
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("X"));
}

#[tokio::test]
async fn non_streaming_request_answered_with_sse_is_parsed() {
    let server = MockServer::start().await;
    strategy("primary", false)
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse(&["a", "b"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_secs(5))
        .complete("p")
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("ab"));
}

#[tokio::test]
async fn server_error_falls_through_to_stream() {
    let server = MockServer::start().await;
    strategy("primary", false)
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    strategy("primary", true)
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse(&["str", "eam"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_secs(5))
        .complete("p")
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("stream"));
}

#[tokio::test]
async fn fallback_model_is_the_last_resort() {
    let server = MockServer::start().await;
    strategy("primary", false)
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;
    strategy("primary", true)
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    strategy("fallback", false)
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_json("from fallback")))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_secs(5))
        .complete("p")
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("from fallback"));
}

#[tokio::test]
async fn timeout_abandons_only_the_current_strategy() {
    let server = MockServer::start().await;
    strategy("primary", false)
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_json("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    strategy("primary", true)
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&["on time"]), "text/event-stream"))
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_millis(300))
        .complete("p")
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("on time"));
}

#[tokio::test]
async fn every_strategy_failing_yields_no_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .expect(3)
        .mount(&server)
        .await;

    let text = client(format!("{}/v1", server.uri()), Duration::from_secs(5))
        .complete("p")
        .await
        .unwrap();
    assert!(text.is_none());
}

#[tokio::test]
async fn unreachable_endpoint_is_an_error() {
    // Grab a free port, then close it so the connection is refused
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = client(format!("http://127.0.0.1:{}/v1", port), Duration::from_secs(5))
        .complete("p")
        .await;
    assert!(matches!(result, Err(CompletionError::Unreachable(_))));
}
