use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CompletionError;
use crate::settings::Settings;
use crate::template::truncate_chars;

const BODY_SNIPPET_CHARS: usize = 200;
const EVENT_STREAM: &str = "text/event-stream";

/// Anything that turns a prompt into model text.
#[async_trait]
pub trait Completer: Send + Sync {
    /// `Ok(None)` means "no result": no credential, or every request shape
    /// came back empty or unusable.
    async fn complete(&self, prompt: &str) -> Result<Option<String>, CompletionError>;
}

#[derive(Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl From<&Settings> for ChatConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            api_key: settings.api_key.trim().to_string(),
            base_url: settings.api_base_url.clone(),
            primary_model: settings.primary_model.clone(),
            fallback_model: settings.fallback_model.clone(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

/// One request shape tried by [`ChatClient::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PrimaryJson,
    PrimaryStream,
    FallbackJson,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::PrimaryJson,
        Strategy::PrimaryStream,
        Strategy::FallbackJson,
    ];

    fn streams(&self) -> bool {
        matches!(self, Strategy::PrimaryStream)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::PrimaryJson => "primary/json",
            Strategy::PrimaryStream => "primary/stream",
            Strategy::FallbackJson => "fallback/json",
        };
        f.write_str(name)
    }
}

/// Chat-completion client that tolerates the three response shapes seen in
/// the wild: plain JSON, SSE served for a non-streaming request, and SSE.
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("wikidef/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, CompletionError> {
        Self::new(ChatConfig::from(settings))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn model_for(&self, strategy: Strategy) -> &str {
        match strategy {
            Strategy::PrimaryJson | Strategy::PrimaryStream => &self.config.primary_model,
            Strategy::FallbackJson => &self.config.fallback_model,
        }
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        prompt: &str,
    ) -> Result<Option<String>, reqwest::Error> {
        let body = json!({
            "model": self.model_for(strategy),
            "stream": strategy.streams(),
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(
                "Completion request ({}) returned HTTP {}: {}",
                strategy,
                status.as_u16(),
                body_snippet(&text)
            );
            return Ok(None);
        }

        let extracted = if strategy.streams() {
            extract_sse_content(&text)
        } else {
            extract_body_content(&content_type, &text)
        };
        if extracted.is_none() {
            debug!(
                "Completion request ({}) gave no usable text: {}",
                strategy,
                body_snippet(&text)
            );
        }
        Ok(extracted)
    }
}

#[async_trait]
impl Completer for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<Option<String>, CompletionError> {
        if self.config.api_key.is_empty() {
            debug!("No API key configured; skipping completion");
            return Ok(None);
        }

        for (index, strategy) in Strategy::ORDER.into_iter().enumerate() {
            match self.attempt(strategy, prompt).await {
                Ok(Some(text)) => {
                    info!("Completion succeeded via {}", strategy);
                    return Ok(Some(text));
                }
                Ok(None) => {}
                Err(e) if index == 0 && e.is_connect() => {
                    return Err(CompletionError::Unreachable(e.to_string()));
                }
                Err(e) if e.is_timeout() => {
                    debug!("Completion request ({}) timed out", strategy);
                }
                Err(e) => {
                    debug!("Completion request ({}) failed: {}", strategy, e);
                }
            }
        }

        Ok(None)
    }
}

/// At most [`BODY_SNIPPET_CHARS`] characters of a response body, for logs.
pub fn body_snippet(body: &str) -> String {
    let snippet = truncate_chars(body, BODY_SNIPPET_CHARS);
    if snippet.len() < body.len() {
        format!("{}…", snippet)
    } else {
        snippet.to_string()
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `choices[0].message.content` of a JSON completion body.
pub fn extract_json_content(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["choices"][0]["message"]["content"]
        .as_str()
        .and_then(non_empty)
}

fn fragment_text(fragment: &Value) -> Option<&str> {
    let choice = &fragment["choices"][0];
    choice["delta"]["content"]
        .as_str()
        .or_else(|| choice["message"]["content"].as_str())
}

/// Concatenates the content of every `data:` line of an event stream.
/// `[DONE]` and fragments that do not parse are skipped.
pub fn extract_sse_content(body: &str) -> Option<String> {
    let mut text = String::new();
    for line in body.lines() {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        let Ok(fragment) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        if let Some(piece) = fragment_text(&fragment) {
            text.push_str(piece);
        }
    }
    non_empty(&text)
}

fn looks_like_event_stream(content_type: &str, body: &str) -> bool {
    content_type.to_ascii_lowercase().contains(EVENT_STREAM)
        || body.trim_start().starts_with("data:")
}

/// Body of a non-streaming request: JSON first, then SSE when the server
/// streamed anyway.
pub fn extract_body_content(content_type: &str, body: &str) -> Option<String> {
    if serde_json::from_str::<Value>(body).is_ok() {
        return extract_json_content(body);
    }
    if looks_like_event_stream(content_type, body) {
        return extract_sse_content(body);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_yields_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"X"}}]}"#;
        assert_eq!(extract_json_content(body), Some("X".to_string()));
    }

    #[test]
    fn json_body_without_content_yields_nothing() {
        assert_eq!(extract_json_content(r#"{"choices":[]}"#), None);
        assert_eq!(
            extract_json_content(r#"{"choices":[{"message":{"content":"   "}}]}"#),
            None
        );
        assert_eq!(extract_json_content("not json"), None);
    }

    #[test]
    fn sse_body_concatenates_deltas_in_order() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\
                    data: [DONE]";
        assert_eq!(extract_sse_content(body), Some("ab".to_string()));
    }

    #[test]
    fn sse_accepts_message_objects_and_skips_garbage() {
        let body = "event: ping\n\
                    data: {\"choices\":[{\"message\":{\"content\":\"Hello \"}}]}\n\
                    data: {broken\n\
                    \n\
                    data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n";
        assert_eq!(extract_sse_content(body), Some("Hello world".to_string()));
    }

    #[test]
    fn sse_with_only_done_is_empty() {
        assert_eq!(extract_sse_content("data: [DONE]\n"), None);
        assert_eq!(extract_sse_content(""), None);
    }

    #[test]
    fn non_stream_body_falls_back_to_sse_parsing() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"z\"}}]}\n\ndata: [DONE]\n";
        assert_eq!(extract_body_content("", sse), Some("z".to_string()));
        assert_eq!(
            extract_body_content("text/event-stream; charset=utf-8", &format!("\n{}", sse)),
            Some("z".to_string())
        );
        assert_eq!(extract_body_content("text/html", "<html>"), None);
    }

    #[test]
    fn snippet_is_bounded() {
        let long = "k".repeat(1000);
        let snippet = body_snippet(&long);
        assert_eq!(snippet.chars().count(), BODY_SNIPPET_CHARS + 1);
        assert_eq!(body_snippet("short"), "short");
    }

    #[tokio::test]
    async fn missing_key_returns_none_without_network() {
        let client = ChatClient::new(ChatConfig {
            api_key: String::new(),
            // Nothing listens here; a request would fail loudly.
            base_url: "http://127.0.0.1:9".to_string(),
            primary_model: "a".to_string(),
            fallback_model: "b".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert!(client.complete("hi").await.unwrap().is_none());
    }
}
