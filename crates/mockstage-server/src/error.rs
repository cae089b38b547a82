use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mockstage_schema::{EngineError, ProviderError};

/// Engine failure carried across the handler boundary. Responds with a
/// status matching the error class and a `{error, message}` JSON body.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
        EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::SessionBusy(_) => StatusCode::CONFLICT,
        EngineError::EvaluationUnparseable(_) => StatusCode::BAD_GATEWAY,
        EngineError::Provider(p) => match p {
            ProviderError::Configuration(_) => StatusCode::BAD_REQUEST,
            ProviderError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ProviderError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ProviderError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProviderError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::debug!("request rejected: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
