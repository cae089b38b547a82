use thiserror::Error;

/// Failures raised by a provider adapter. Classification follows the
/// backend's HTTP status where one exists; transport failures map to
/// `ProviderUnavailable`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => Self::AuthenticationFailed(detail),
            429 => Self::RateLimited(detail),
            400 | 422 => Self::Configuration(detail),
            500..=599 => Self::ProviderUnavailable(detail),
            _ => Self::MalformedResponse(format!("unexpected status {status}: {detail}")),
        }
    }

    /// Transient failures the caller may retry with backoff. Retrying
    /// never happens inside the engine itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::ProviderUnavailable(_))
    }
}

/// Failures raised by the interview session engine and session store.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid session state: {0}")]
    InvalidState(String),
    #[error("session busy: {0}")]
    SessionBusy(String),
    #[error("evaluation response could not be parsed: {0}")]
    EvaluationUnparseable(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl EngineError {
    /// Stable machine-readable tag for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::SessionBusy(_) => "session_busy",
            Self::EvaluationUnparseable(_) => "evaluation_unparseable",
            Self::Provider(ProviderError::Configuration(_)) => "configuration",
            Self::Provider(ProviderError::AuthenticationFailed(_)) => "authentication_failed",
            Self::Provider(ProviderError::RateLimited(_)) => "rate_limited",
            Self::Provider(ProviderError::ProviderUnavailable(_)) => "provider_unavailable",
            Self::Provider(ProviderError::MalformedResponse(_)) => "malformed_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ProviderError::from_status(401, "bad key"),
            ProviderError::AuthenticationFailed("bad key".into())
        );
        assert_eq!(
            ProviderError::from_status(403, "forbidden"),
            ProviderError::AuthenticationFailed("forbidden".into())
        );
        assert_eq!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimited("slow down".into())
        );
        assert_eq!(
            ProviderError::from_status(400, "bad request"),
            ProviderError::Configuration("bad request".into())
        );
        assert!(matches!(
            ProviderError::from_status(503, "overloaded"),
            ProviderError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            ProviderError::from_status(302, "redirect"),
            ProviderError::MalformedResponse(_)
        ));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ProviderError::RateLimited("x".into()).is_retryable());
        assert!(ProviderError::ProviderUnavailable("x".into()).is_retryable());
        assert!(!ProviderError::AuthenticationFailed("x".into()).is_retryable());
        assert!(!ProviderError::Configuration("x".into()).is_retryable());
        assert!(!ProviderError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn engine_error_kind_tags() {
        assert_eq!(EngineError::SessionNotFound("s".into()).kind(), "session_not_found");
        assert_eq!(
            EngineError::Provider(ProviderError::RateLimited("x".into())).kind(),
            "rate_limited"
        );
        assert_eq!(
            EngineError::Provider(ProviderError::Configuration("x".into())).kind(),
            "configuration"
        );
    }
}
