pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;
pub mod stall;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use mockstage_schema::{LlmConfig, ProviderError, ProviderKind};
use tokio_stream::iter as stream_iter;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use stall::{with_stall_timeout, StallTimeouts};
pub use types::{ChatMessage, ChatRequest, ChatResponse, ChatRole, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Uniform capability interface over the language-model backends. The
/// engine never branches on provider identity beyond [`create_provider`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One buffered request/response call.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
    /// Lazy sequence of text fragments; finite; not restartable.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError>;
}

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434";

/// Closed-set dispatch from a per-request config to an adapter. Fails
/// fast with `Configuration` before any network call.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    config.validate()?;
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => {
            let key = required_key(config)?;
            Arc::new(AnthropicProvider::new(key, ANTHROPIC_API_BASE))
        }
        ProviderKind::OpenAi => {
            let key = required_key(config)?;
            Arc::new(OpenAiProvider::new(key, OPENAI_API_BASE))
        }
        ProviderKind::Gemini => {
            let key = required_key(config)?;
            Arc::new(GeminiProvider::new(key))
        }
        ProviderKind::Ollama => {
            let base = config
                .base_url
                .as_deref()
                .unwrap_or(OLLAMA_DEFAULT_BASE)
                .trim_end_matches('/');
            // Ollama speaks the OpenAI protocol under /v1; callers pass
            // the bare host (http://localhost:11434).
            let base = if base.ends_with("/v1") {
                base.to_string()
            } else {
                format!("{base}/v1")
            };
            // No key needed, but the compat client sends a bearer header.
            Arc::new(OpenAiProvider::new("ollama", base))
        }
    };
    Ok(provider)
}

fn required_key(config: &LlmConfig) -> Result<String, ProviderError> {
    config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::Configuration(format!("{} requires api_key", config.provider.as_str()))
        })
}

/// Credential check: one minimal non-streamed call with a tiny token
/// ceiling, so it never costs a full turn's budget.
pub async fn test_connection(config: &LlmConfig) -> Result<(), ProviderError> {
    let provider = create_provider(config)?;
    let request = ChatRequest::simple(
        config.model.clone(),
        None,
        "Reply with the single word: ok",
    )
    .with_max_tokens(8);
    provider.chat(request).await.map(|_| ())
}

/// Scripted provider for tests: streams the reply word by word, the way
/// a real backend fragments it.
pub struct StubProvider {
    reply: String,
}

impl StubProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            text: self.reply.clone(),
            input_tokens: Some(10),
            output_tokens: Some(20),
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn stream(&self, _request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let mut chunks: Vec<Result<StreamChunk, ProviderError>> = self
            .reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::delta(word)))
            .collect();
        chunks.push(Ok(StreamChunk::final_chunk(
            Some("end_turn".into()),
            Some(20),
        )));
        Ok(Box::pin(stream_iter(chunks)))
    }
}
