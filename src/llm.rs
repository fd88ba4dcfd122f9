use crate::error::ChatError;
use crate::events::{Message, Role};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

/// Literal payload some backends send instead of a JSON completion frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// Normalized event decoded from one frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text delta to append to the assistant message
    ContentDelta(String),
    /// Backend finished the reply
    Completion,
    /// Backend reported an error
    Failure(String),
}

/// OpenAI-compatible chunk: `{"choices":[{"delta":{"content":".."},"finish_reason":..}]}`
#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: Option<ChoiceDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Simpler custom shape keyed by `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TypedFrame {
    Content {
        #[serde(default)]
        content: Option<String>,
    },
    Done,
    Error {
        #[serde(default)]
        error: Option<String>,
    },
}

/// Interpret one frame payload.
///
/// Shapes are tried in a fixed order: the done sentinel, an OpenAI-style
/// `choices` array, then the `type`-tagged shape. Anything else, including
/// payloads that are not JSON, yields `None` so one bad frame never aborts
/// an otherwise healthy stream.
pub fn extract_event(payload: &str) -> Option<StreamEvent> {
    if payload.trim() == DONE_SENTINEL {
        return Some(StreamEvent::Completion);
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, payload, "ignoring unparsable frame");
            return None;
        }
    };

    if let Some(first) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    {
        return extract_choice(first);
    }

    match serde_json::from_value::<TypedFrame>(value) {
        Ok(TypedFrame::Content { content }) => content
            .filter(|text| !text.is_empty())
            .map(StreamEvent::ContentDelta),
        Ok(TypedFrame::Done) => Some(StreamEvent::Completion),
        Ok(TypedFrame::Error { error }) => Some(StreamEvent::Failure(
            error.unwrap_or_else(|| "Unknown error".to_string()),
        )),
        Err(err) => {
            tracing::debug!(error = %err, payload, "ignoring frame of unknown shape");
            None
        }
    }
}

fn extract_choice(choice: &Value) -> Option<StreamEvent> {
    let choice = match CompletionChoice::deserialize(choice) {
        Ok(choice) => choice,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed choice");
            return None;
        }
    };

    if matches!(choice.finish_reason.as_deref(), Some("stop" | "length")) {
        return Some(StreamEvent::Completion);
    }

    choice
        .delta
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty())
        .map(StreamEvent::ContentDelta)
}

/// Prior turn as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request body posted to the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Every prior turn plus the turn carried by `message`
    pub conversation_history: Vec<HistoryMessage>,
}

/// Response body as a stream of raw chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// HTTP client for the streaming chat endpoint
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Only connection establishment is bounded; the stream itself may run as
    /// long as the caller lets it.
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChatError::Request(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the request and hand back the body once headers arrive.
    pub async fn open(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "chat endpoint responded");
        if !status.is_success() {
            return Err(ChatError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| ChatError::Transport(e.to_string()))
            .boxed())
    }

    /// GET `/health` on the endpoint's origin.
    pub async fn health_check(&self) -> bool {
        let Ok(mut url) = reqwest::Url::parse(&self.endpoint) else {
            return false;
        };
        url.set_path("/health");
        url.set_query(None);

        match self
            .client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_sentinel() {
        assert_eq!(extract_event("[DONE]"), Some(StreamEvent::Completion));
    }

    #[test]
    fn test_openai_delta() {
        let event = extract_event(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(event, Some(StreamEvent::ContentDelta("Hi".to_string())));
    }

    #[test]
    fn test_openai_finish_reasons() {
        for reason in ["stop", "length"] {
            let payload = format!(r#"{{"choices":[{{"delta":{{}},"finish_reason":"{reason}"}}]}}"#);
            assert_eq!(extract_event(&payload), Some(StreamEvent::Completion));
        }
    }

    #[test]
    fn test_finish_reason_wins_over_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"tail"},"finish_reason":"stop"}]}"#;
        assert_eq!(extract_event(payload), Some(StreamEvent::Completion));
    }

    #[test]
    fn test_openai_other_finish_reason_with_text() {
        let payload = r#"{"choices":[{"delta":{"content":"x"},"finish_reason":"content_filter"}]}"#;
        assert_eq!(
            extract_event(payload),
            Some(StreamEvent::ContentDelta("x".to_string()))
        );
    }

    #[test]
    fn test_openai_empty_delta_ignored() {
        assert_eq!(extract_event(r#"{"choices":[{"delta":{"content":""}}]}"#), None);
        assert_eq!(extract_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(extract_event(r#"{"choices":[{"finish_reason":null}]}"#), None);
    }

    #[test]
    fn test_empty_choices_falls_through_to_typed_shape() {
        let payload = r#"{"choices":[],"type":"content","content":"ok"}"#;
        assert_eq!(
            extract_event(payload),
            Some(StreamEvent::ContentDelta("ok".to_string()))
        );
    }

    #[test]
    fn test_typed_shapes() {
        assert_eq!(
            extract_event(r#"{"type":"content","content":"abc","timestamp":1.5}"#),
            Some(StreamEvent::ContentDelta("abc".to_string()))
        );
        assert_eq!(
            extract_event(r#"{"type":"done","fullContent":"abc"}"#),
            Some(StreamEvent::Completion)
        );
        assert_eq!(
            extract_event(r#"{"type":"error","error":"rate limited"}"#),
            Some(StreamEvent::Failure("rate limited".to_string()))
        );
        assert_eq!(
            extract_event(r#"{"type":"error"}"#),
            Some(StreamEvent::Failure("Unknown error".to_string()))
        );
    }

    #[test]
    fn test_ignored_payloads() {
        assert_eq!(extract_event(r#"{"type":"start","timestamp":1.0}"#), None);
        assert_eq!(extract_event(r#"{"type":"content"}"#), None);
        assert_eq!(extract_event("not json"), None);
        assert_eq!(extract_event(r#"{"unrelated":true}"#), None);
        assert_eq!(extract_event("42"), None);
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            message: "hello".to_string(),
            conversation_history: vec![HistoryMessage {
                role: Role::User,
                content: "hello".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "hello",
                "conversationHistory": [{"role": "user", "content": "hello"}]
            })
        );
    }
}
