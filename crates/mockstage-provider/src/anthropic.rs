//! Anthropic Messages API adapter.

use async_trait::async_trait;
use mockstage_schema::ProviderError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::{sse, ChatRequest, ChatResponse, ChunkStream, LlmProvider, StreamChunk};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn to_api_request(request: ChatRequest, stream: bool) -> ApiRequest {
        ApiRequest {
            model: request.model,
            system: request.system,
            max_tokens: request.max_tokens,
            messages: request
                .messages
                .into_iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content,
                })
                .collect(),
            stream,
        }
    }

    async fn post(&self, payload: &ApiRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.api_base);
        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProviderError::from_status(status.as_u16(), detail));
        }
        Ok(resp)
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::ProviderUnavailable("anthropic request timed out".into())
    } else if e.is_connect() {
        ProviderError::ProviderUnavailable(format!("anthropic connect error: {e}"))
    } else {
        ProviderError::ProviderUnavailable(format!("anthropic request error: {e}"))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let payload = Self::to_api_request(request, false);
        let resp = self.post(&payload).await?;

        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("anthropic body: {e}")))?;
        let text = body
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ChatResponse {
            text,
            input_tokens: body.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: body.usage.as_ref().map(|u| u.output_tokens),
            stop_reason: body.stop_reason,
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let payload = Self::to_api_request(request, true);
        let resp = self.post(&payload).await?;

        let events = sse::data_events(resp.bytes_stream());
        let stream = async_stream::stream! {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                match event {
                    Ok(data) => match serde_json::from_str::<serde_json::Value>(&data) {
                        Ok(value) => {
                            if let Some(chunk) = chunk_from_event(&value) {
                                let is_final = chunk.is_final;
                                yield Ok(chunk);
                                if is_final {
                                    return;
                                }
                            }
                        }
                        // A single corrupt event must not abort the answer.
                        Err(e) => tracing::warn!("skipping malformed anthropic event: {e}"),
                    },
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

fn chunk_from_event(event: &serde_json::Value) -> Option<StreamChunk> {
    match event.get("type")?.as_str()? {
        "content_block_delta" => {
            let text = event.get("delta")?.get("text")?.as_str()?;
            Some(StreamChunk::delta(text))
        }
        "message_delta" => {
            let delta = event.get("delta")?;
            let stop_reason = delta
                .get("stop_reason")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let output_tokens = event
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok());
            Some(StreamChunk::final_chunk(stop_reason, output_tokens))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    usage: Option<ApiUsage>,
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn request_serialization_matches_wire_shape() {
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: Some("You are an interviewer".into()),
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 1024,
        };
        let value = serde_json::to_value(AnthropicProvider::to_api_request(req, false)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "claude-sonnet-4-20250514",
                "system": "You are an interviewer",
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn stream_flag_serialized_only_when_set() {
        let req = ChatRequest::simple("m", None, "hi");
        let value = serde_json::to_value(AnthropicProvider::to_api_request(req.clone(), false)).unwrap();
        assert!(value.get("stream").is_none());
        let value = serde_json::to_value(AnthropicProvider::to_api_request(req, true)).unwrap();
        assert_eq!(value.get("stream").unwrap(), true);
    }

    #[test]
    fn chunk_from_delta_event() {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hello"}
        });
        let chunk = chunk_from_event(&event).unwrap();
        assert_eq!(chunk.delta, "Hello");
        assert!(!chunk.is_final);
    }

    #[test]
    fn chunk_from_message_delta_is_final() {
        let event = serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 42}
        });
        let chunk = chunk_from_event(&event).unwrap();
        assert!(chunk.is_final);
        assert_eq!(chunk.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(chunk.output_tokens, Some(42));
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let event = serde_json::json!({"type": "ping"});
        assert!(chunk_from_event(&event).is_none());
    }

    #[tokio::test]
    async fn chat_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Question 1 of 5: ..."}],
                "usage": {"input_tokens": 12, "output_tokens": 34},
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("sk-test", server.uri());
        let resp = provider
            .chat(ChatRequest::simple("claude-sonnet-4-20250514", None, "begin"))
            .await
            .unwrap();
        assert_eq!(resp.text, "Question 1 of 5: ...");
        assert_eq!(resp.output_tokens, Some(34));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("bad-key", server.uri());
        let err = provider
            .chat(ChatRequest::simple("m", None, "hi"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::AuthenticationFailed("invalid x-api-key".into())
        );
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("sk-test", server.uri());
        let err = provider
            .chat(ChatRequest::simple("m", None, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[tokio::test]
    async fn stream_skips_malformed_event_and_delivers_rest() {
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Hel\"}}\n\n",
            "data: {not json at all}\n\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"lo\"}}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("sk-test", server.uri());
        let stream = provider
            .stream(ChatRequest::simple("m", None, "hi"))
            .await
            .unwrap();
        tokio::pin!(stream);

        let mut collected = String::new();
        let mut got_final = false;
        while let Some(item) = stream.next().await {
            let chunk = item.unwrap();
            if chunk.is_final {
                got_final = true;
                assert_eq!(chunk.stop_reason.as_deref(), Some("end_turn"));
            } else {
                collected.push_str(&chunk.delta);
            }
        }
        assert_eq!(collected, "Hello");
        assert!(got_final);
    }
}
