//! OpenAI Chat Completions adapter. Also serves any compatible endpoint,
//! which is how the local Ollama backend is reached (its /v1 API speaks
//! the same protocol).

use async_trait::async_trait;
use mockstage_schema::ProviderError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::{sse, ChatRequest, ChatResponse, ChunkStream, LlmProvider, StreamChunk};

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiProvider {
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
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(ApiMessage {
                role: "system".into(),
                content: system,
            });
        }
        messages.extend(request.messages.into_iter().map(|m| ApiMessage {
            role: m.role.as_str().to_string(),
            content: m.content,
        }));

        ApiRequest {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn post(&self, payload: &ApiRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
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
        ProviderError::ProviderUnavailable("openai request timed out".into())
    } else {
        ProviderError::ProviderUnavailable(format!("openai request error: {e}"))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let payload = Self::to_api_request(request, false);
        let resp = self.post(&payload).await?;

        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("openai body: {e}")))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("openai: empty choices".into()))?;

        Ok(ChatResponse {
            text: choice.message.map(|m| m.content).unwrap_or_default(),
            input_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
            stop_reason: choice.finish_reason,
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
                    Ok(data) => match serde_json::from_str::<StreamEvent>(&data) {
                        Ok(event) => {
                            if let Some(chunk) = chunk_from_event(event) {
                                let is_final = chunk.is_final;
                                yield Ok(chunk);
                                if is_final {
                                    return;
                                }
                            }
                        }
                        Err(e) => tracing::warn!("skipping malformed openai event: {e}"),
                    },
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            // Some compatible backends end with [DONE] and no finish_reason.
            yield Ok(StreamChunk::final_chunk(None, None));
        };
        Ok(Box::pin(stream))
    }
}

fn chunk_from_event(event: StreamEvent) -> Option<StreamChunk> {
    let choice = event.choices.into_iter().next()?;
    if let Some(reason) = choice.finish_reason {
        let output_tokens = event.usage.as_ref().map(|u| u.completion_tokens);
        return Some(StreamChunk::final_chunk(Some(reason), output_tokens));
    }
    let text = choice.delta.and_then(|d| d.content)?;
    if text.is_empty() {
        return None;
    }
    Some(StreamChunk::delta(text))
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
