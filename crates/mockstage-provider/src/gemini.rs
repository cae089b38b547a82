//! Google Gemini generateContent adapter.
//!
//! https://ai.google.dev/api/generate-content

use async_trait::async_trait;
use mockstage_schema::ProviderError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::{sse, ChatRequest, ChatResponse, ChatRole, ChunkStream, LlmProvider, StreamChunk};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base(api_key, GEMINI_API_BASE)
    }

    pub fn with_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn build_request(request: &ChatRequest) -> GeminiRequest {
        let contents = request
            .messages
            .iter()
            .map(|m| GeminiContent {
                role: match m.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "model".to_string(),
                },
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction: request.system.as_ref().map(|s| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: s.clone() }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(request.max_tokens),
            }),
        }
    }

    async fn post(&self, url: String, payload: &GeminiRequest) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::ProviderUnavailable("gemini request timed out".into())
                } else {
                    ProviderError::ProviderUnavailable(format!("gemini request error: {e}"))
                }
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, request.model, self.api_key
        );
        let payload = Self::build_request(&request);
        let resp = self.post(url, &payload).await?;

        let body: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("gemini body: {e}")))?;
        to_chat_response(body)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?key={}&alt=sse",
            self.api_base, request.model, self.api_key
        );
        let payload = Self::build_request(&request);
        let resp = self.post(url, &payload).await?;

        let events = sse::data_events(resp.bytes_stream());
        let stream = async_stream::stream! {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                match event {
                    Ok(data) => match serde_json::from_str::<GeminiResponse>(&data) {
                        Ok(response) => {
                            for chunk in chunks_from_response(response) {
                                let is_final = chunk.is_final;
                                yield Ok(chunk);
                                if is_final {
                                    return;
                                }
                            }
                        }
                        Err(e) => tracing::warn!("skipping malformed gemini event: {e}"),
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

fn map_finish_reason(reason: Option<&str>) -> Option<String> {
    match reason {
        Some("STOP") => Some("end_turn".to_string()),
        Some("MAX_TOKENS") => Some("max_tokens".to_string()),
        Some(r) => Some(r.to_lowercase()),
        None => None,
    }
}

fn chunks_from_response(response: GeminiResponse) -> Vec<StreamChunk> {
    let mut out = Vec::new();
    let Some(candidate) = response.candidates.first() else {
        return out;
    };
    for part in &candidate.content.parts {
        if !part.text.is_empty() {
            out.push(StreamChunk::delta(part.text.clone()));
        }
    }
    if candidate.finish_reason.is_some() {
        out.push(StreamChunk::final_chunk(
            map_finish_reason(candidate.finish_reason.as_deref()),
            response
                .usage_metadata
                .as_ref()
                .map(|u| u.candidates_token_count),
        ));
    }
    out
}

fn to_chat_response(body: GeminiResponse) -> Result<ChatResponse, ProviderError> {
    let candidate = body
        .candidates
        .first()
        .ok_or_else(|| ProviderError::MalformedResponse("gemini: empty candidates".into()))?;

    let text = candidate
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("");

    Ok(ChatResponse {
        text,
        input_tokens: body.usage_metadata.as_ref().map(|u| u.prompt_token_count),
        output_tokens: body
            .usage_metadata
            .as_ref()
            .map(|u| u.candidates_token_count),
        stop_reason: map_finish_reason(candidate.finish_reason.as_deref()),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn build_request_maps_roles_and_system() {
        let req = ChatRequest {
            model: "gemini-2.0-flash".into(),
            system: Some("Be an interviewer".into()),
            messages: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            max_tokens: 512,
        };
        let api = GeminiProvider::build_request(&req);
        assert!(api.system_instruction.is_some());
        assert_eq!(api.contents.len(), 2);
        assert_eq!(api.contents[0].role, "user");
        assert_eq!(api.contents[1].role, "model");
    }

    #[test]
    fn response_parsing_maps_stop_reason() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2}
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let resp = to_chat_response(parsed).unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.input_tokens, Some(5));
    }

    #[test]
    fn streamed_response_with_finish_emits_final_chunk() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "done"}]},
                "finishReason": "STOP"
            }]
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let chunks = chunks_from_response(parsed);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta, "done");
        assert!(chunks[1].is_final);
    }

    #[test]
    fn empty_candidates_is_malformed() {
        let parsed: GeminiResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(matches!(
            to_chat_response(parsed),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn chat_round_trip_with_key_in_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "g-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "First question:"}]},
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::with_base("g-test", server.uri());
        let resp = provider
            .chat(ChatRequest::simple("gemini-2.0-flash", None, "begin"))
            .await
            .unwrap();
        assert_eq!(resp.text, "First question:");
    }
}
