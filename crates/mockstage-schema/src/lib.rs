pub mod error;

pub use error::{EngineError, ProviderError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Language-model backend selector. The three cloud providers require an
/// API key; `ollama` talks to a local endpoint and needs none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

/// Per-request LLM configuration. Never persisted by the engine; the
/// caller supplies it on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Endpoint override, meaningful only for `ollama`.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.provider.requires_api_key()
            && self.api_key.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(ProviderError::Configuration(format!(
                "{} requires api_key",
                self.provider.as_str()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ProviderError::Configuration("model must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    GeneralEngineering,
    SystemDesign,
    DomainSpecific,
    MlTheory,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

pub const MAX_QUESTION_COUNT: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    pub interview_type: InterviewType,
    pub difficulty: Difficulty,
    pub question_count: u8,
}

impl InterviewConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.question_count == 0 || self.question_count > MAX_QUESTION_COUNT {
            return Err(EngineError::Configuration(format!(
                "question_count must be between 1 and {MAX_QUESTION_COUNT}, got {}",
                self.question_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
    System,
}

/// One transcript entry. Append-only; transcript order is replayed
/// verbatim to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn interviewer(content: impl Into<String>) -> Self {
        Self::new(Role::Interviewer, content)
    }

    pub fn candidate(content: impl Into<String>) -> Self {
        Self::new(Role::Candidate, content)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Evaluating,
    Closed,
}

impl SessionState {
    /// Valid transitions: active -> evaluating, evaluating -> closed,
    /// active -> closed (explicit abandonment). Closed is terminal.
    pub fn can_transition(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Evaluating)
                | (Self::Evaluating, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub config: InterviewConfig,
    pub transcript: Vec<Message>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub report: Option<EvaluationReport>,
}

impl Session {
    pub fn new(config: InterviewConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id: generate_session_id(),
            config,
            transcript: Vec::new(),
            state: SessionState::Active,
            created_at: now,
            last_active: now,
            report: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_idle_longer_than(&self, idle: chrono::Duration) -> bool {
        Utc::now() - self.last_active >= idle
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            interview_type: self.config.interview_type,
            difficulty: self.config.difficulty,
            state: self.state,
            message_count: self.transcript.len(),
            score: self.report.as_ref().map(|r| r.overall_score),
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }
}

/// Opaque session identifier, "int_" plus 12 hex characters.
pub fn generate_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("int_{}", &hex[..12])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub interview_type: InterviewType,
    pub difficulty: Difficulty,
    pub state: SessionState,
    pub message_count: usize,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Structured score report produced once per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub overall_score: f64,
    pub correctness: f64,
    pub depth: f64,
    pub communication: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_to_improve: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// One event on a streamed turn. Serialized shape matches what clients
/// reassemble: `{"type": "token", "content": "..."}` etc. `session_id`
/// is emitted once, only on start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum TurnEvent {
    SessionId(String),
    Token(String),
    Done,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InterviewConfig {
        InterviewConfig {
            interview_type: InterviewType::SystemDesign,
            difficulty: Difficulty::Medium,
            question_count: 5,
        }
    }

    #[test]
    fn provider_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ProviderKind::Anthropic).unwrap(),
            serde_json::json!("anthropic")
        );
        let parsed: ProviderKind = serde_json::from_str("\"ollama\"").unwrap();
        assert_eq!(parsed, ProviderKind::Ollama);
    }

    #[test]
    fn llm_config_cloud_without_key_is_rejected() {
        let cfg = LlmConfig {
            provider: ProviderKind::OpenAi,
            api_key: None,
            model: "gpt-4o-mini".into(),
            base_url: None,
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn llm_config_blank_key_is_rejected() {
        let cfg = LlmConfig {
            provider: ProviderKind::Gemini,
            api_key: Some("   ".into()),
            model: "gemini-2.0-flash".into(),
            base_url: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn llm_config_ollama_without_key_is_accepted() {
        let cfg = LlmConfig {
            provider: ProviderKind::Ollama,
            api_key: None,
            model: "llama3.2".into(),
            base_url: Some("http://localhost:11434".into()),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn interview_config_bounds() {
        let mut cfg = config();
        assert!(cfg.validate().is_ok());
        cfg.question_count = 0;
        assert!(cfg.validate().is_err());
        cfg.question_count = 11;
        assert!(cfg.validate().is_err());
        cfg.question_count = 10;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn state_machine_transitions() {
        use SessionState::*;
        assert!(Active.can_transition(Evaluating));
        assert!(Evaluating.can_transition(Closed));
        assert!(Active.can_transition(Closed));
        assert!(!Closed.can_transition(Active));
        assert!(!Closed.can_transition(Evaluating));
        assert!(!Evaluating.can_transition(Active));
        assert!(!Active.can_transition(Active));
    }

    #[test]
    fn session_id_shape() {
        let id = generate_session_id();
        assert!(id.starts_with("int_"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_session_is_active_and_empty() {
        let session = Session::new(config());
        assert_eq!(session.state, SessionState::Active);
        assert!(session.transcript.is_empty());
        assert!(session.report.is_none());
    }

    #[test]
    fn summary_reflects_report_score() {
        let mut session = Session::new(config());
        assert_eq!(session.summary().score, None);
        session.report = Some(EvaluationReport {
            overall_score: 7.5,
            correctness: 8.0,
            depth: 6.0,
            communication: 7.0,
            strengths: vec![],
            areas_to_improve: vec![],
            recommendations: vec![],
        });
        assert_eq!(session.summary().score, Some(7.5));
    }

    #[test]
    fn turn_event_wire_shape() {
        let json = serde_json::to_value(TurnEvent::Token("Hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "token", "content": "Hi"}));
        let json = serde_json::to_value(TurnEvent::SessionId("int_abc".into())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "session_id", "content": "int_abc"})
        );
        let json = serde_json::to_value(TurnEvent::Done).unwrap();
        assert_eq!(json, serde_json::json!({"type": "done"}));
    }

    #[test]
    fn idle_detection() {
        let mut session = Session::new(config());
        session.last_active = Utc::now() - chrono::Duration::seconds(100);
        assert!(session.is_idle_longer_than(chrono::Duration::seconds(50)));
        session.touch();
        assert!(!session.is_idle_longer_than(chrono::Duration::seconds(50)));
    }
}
