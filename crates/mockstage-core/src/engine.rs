//! Interview session engine: orchestrates the session state machine,
//! drives the provider adapter, relays streamed fragments to the caller
//! and appends completed messages to the session store.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use mockstage_provider::{
    create_provider, with_stall_timeout, ChatMessage, ChatRequest, ChunkStream, LlmProvider,
    StallTimeouts,
};
use mockstage_schema::{
    EngineError, EvaluationReport, InterviewConfig, LlmConfig, Message, ProviderError, Role,
    Session, SessionState, SessionSummary, TurnEvent,
};
use tokio_stream::StreamExt;

use crate::evaluation;
use crate::prompt;
use crate::store::{SessionStore, TurnGuard};

const TURN_MAX_TOKENS: u32 = 1024;
const EVAL_MAX_TOKENS: u32 = 1536;
const EVALUATOR_SYSTEM: &str =
    "You are a technical interview evaluator. Return only valid JSON.";

pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// Adapter selection seam. The default goes through the closed provider
/// set; tests substitute scripted providers here.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError>;
}

pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        create_provider(config)
    }
}

pub struct InterviewEngine {
    store: Arc<SessionStore>,
    factory: Arc<dyn ProviderFactory>,
    stall: StallTimeouts,
}

impl InterviewEngine {
    pub fn new(store: Arc<SessionStore>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            store,
            factory,
            stall: StallTimeouts::default(),
        }
    }

    pub fn with_stall_timeouts(mut self, stall: StallTimeouts) -> Self {
        self.stall = stall;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Create a session and stream the interviewer's opening message.
    /// The session id is returned directly and is also the first event
    /// on the stream.
    pub async fn start(
        &self,
        config: InterviewConfig,
        llm: LlmConfig,
    ) -> Result<(String, TurnStream), EngineError> {
        config.validate()?;
        llm.validate()?;
        let provider = self.factory.create(&llm)?;

        let session = self.store.create(config.clone());
        let session_id = session.session_id.clone();
        let guard = self.store.begin_turn(&session_id)?;

        let request = ChatRequest {
            model: llm.model,
            system: Some(prompt::start_prompt(&config)),
            messages: vec![ChatMessage::user(prompt::OPENING_MESSAGE)],
            max_tokens: TURN_MAX_TOKENS,
        };
        let chunks = provider.stream(request).await?;
        let chunks = with_stall_timeout(chunks, self.stall);

        tracing::info!(session_id = %session_id, "interview started");
        let stream = self.relay(session_id.clone(), chunks, guard, true);
        Ok((session_id, stream))
    }

    /// One candidate turn. The candidate message is appended before the
    /// provider call, so a retried stream never duplicates it; the
    /// interviewer reply is appended only on clean completion.
    pub async fn send(
        &self,
        session_id: &str,
        candidate_message: impl Into<String>,
        llm: LlmConfig,
    ) -> Result<TurnStream, EngineError> {
        llm.validate()?;
        let provider = self.factory.create(&llm)?;
        let guard = self.store.begin_turn(session_id)?;

        let session = self.store.get(session_id)?;
        if session.state != SessionState::Active {
            return Err(EngineError::InvalidState(format!(
                "session {session_id} is {:?}, expected active",
                session.state
            )));
        }

        self.store
            .append(session_id, Message::candidate(candidate_message))?;
        let session = self.store.get(session_id)?;

        let request = ChatRequest {
            model: llm.model,
            system: Some(prompt::turn_prompt(&session.transcript, &session.config)),
            messages: chat_history(&session.transcript),
            max_tokens: TURN_MAX_TOKENS,
        };
        let chunks = provider.stream(request).await?;
        let chunks = with_stall_timeout(chunks, self.stall);

        Ok(self.relay(session_id.to_string(), chunks, guard, false))
    }

    /// Produce the structured evaluation report and close the session.
    /// A closed session returns its cached report without a provider
    /// call; an unparseable response gets one strict reformat retry and
    /// otherwise leaves the session in `evaluating` for another attempt.
    pub async fn evaluate(
        &self,
        session_id: &str,
        llm: LlmConfig,
    ) -> Result<EvaluationReport, EngineError> {
        llm.validate()?;
        let _guard = self.store.begin_turn(session_id)?;

        let session = self.store.get(session_id)?;
        if session.state == SessionState::Closed {
            return session.report.clone().ok_or_else(|| {
                EngineError::InvalidState(format!("session {session_id} closed without a report"))
            });
        }
        if session.transcript.len() < 2 {
            return Err(EngineError::Configuration(
                "evaluation requires at least one interviewer/candidate exchange".into(),
            ));
        }
        if session.state == SessionState::Active {
            self.store
                .transition(session_id, SessionState::Evaluating)?;
        }

        let provider = self.factory.create(&llm)?;
        let request = ChatRequest {
            model: llm.model.clone(),
            system: Some(EVALUATOR_SYSTEM.into()),
            messages: vec![ChatMessage::user(prompt::evaluation_prompt(
                &session.transcript,
                &session.config,
            ))],
            max_tokens: EVAL_MAX_TOKENS,
        };
        let raw = provider.chat(request).await?.text;

        let report = match evaluation::parse(&raw) {
            Ok(report) => report,
            Err(first_err) => {
                tracing::warn!(session_id = %session_id, "evaluation unparseable, retrying: {first_err}");
                let retry = ChatRequest {
                    model: llm.model,
                    system: Some(EVALUATOR_SYSTEM.into()),
                    messages: vec![ChatMessage::user(prompt::reformat_prompt(&raw))],
                    max_tokens: EVAL_MAX_TOKENS,
                };
                let raw = provider.chat(retry).await?.text;
                evaluation::parse(&raw)?
            }
        };

        self.store.attach_report(session_id, report.clone())?;
        self.store.transition(session_id, SessionState::Closed)?;
        tracing::info!(session_id = %session_id, score = report.overall_score, "interview evaluated");
        Ok(report)
    }

    /// Close a session without evaluating it.
    pub fn abandon(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self.store.get(session_id)?;
        if session.state == SessionState::Closed {
            return Ok(());
        }
        self.store.transition(session_id, SessionState::Closed)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.list()
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, EngineError> {
        self.store.get(session_id)
    }

    /// Relay provider fragments as turn events, accumulating the full
    /// reply. The accumulated message is appended only after a clean
    /// end-of-stream; failure or cancellation (dropping the stream)
    /// discards the partial text and releases the turn guard.
    fn relay(
        &self,
        session_id: String,
        mut chunks: ChunkStream,
        guard: TurnGuard,
        announce: bool,
    ) -> TurnStream {
        let store = Arc::clone(&self.store);
        let stream = async_stream::stream! {
            let _guard = guard;
            if announce {
                yield TurnEvent::SessionId(session_id.clone());
            }
            let mut full = String::new();
            loop {
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        if !chunk.delta.is_empty() {
                            full.push_str(&chunk.delta);
                            yield TurnEvent::Token(chunk.delta);
                        }
                        if chunk.is_final {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, "stream failed, discarding partial reply: {e}");
                        yield TurnEvent::Error(e.to_string());
                        return;
                    }
                    None => break,
                }
            }
            if full.is_empty() {
                yield TurnEvent::Error("provider returned an empty reply".into());
                return;
            }
            match store.append(&session_id, Message::interviewer(full)) {
                Ok(()) => yield TurnEvent::Done,
                Err(e) => yield TurnEvent::Error(e.to_string()),
            }
        };
        Box::pin(stream)
    }
}

/// Replay the transcript as alternating chat roles. The stored opening
/// instruction is synthetic, so it is re-prefixed to keep the first
/// message a user turn for every backend.
fn chat_history(transcript: &[Message]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    messages.push(ChatMessage::user(prompt::OPENING_MESSAGE));
    for message in transcript {
        match message.role {
            Role::Interviewer => messages.push(ChatMessage::assistant(message.content.clone())),
            Role::Candidate => messages.push(ChatMessage::user(message.content.clone())),
            Role::System => {}
        }
    }
    messages
}
