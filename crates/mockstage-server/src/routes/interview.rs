//! Interview API. Streamed turns go out as SSE where each event's data
//! field is one serialized turn event; everything else is plain JSON.

use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_core::Stream;
use mockstage_core::TurnStream;
use mockstage_schema::{InterviewConfig, LlmConfig, Session, SessionSummary};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartRequest {
    #[serde(flatten)]
    pub config: InterviewConfig,
    pub llm_config: LlmConfig,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub message: String,
    pub llm_config: LlmConfig,
}

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub session_id: String,
    pub llm_config: LlmConfig,
}

#[derive(Deserialize)]
pub struct TestConnectionRequest {
    pub llm_config: LlmConfig,
}

#[derive(Serialize)]
pub struct TestResult {
    pub ok: bool,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/test-connection", post(test_connection))
        .route("/start", post(start_interview))
        .route("/message", post(send_message))
        .route("/evaluate", post(evaluate_interview))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(abandon_session))
}

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

fn sse_from(stream: TurnStream) -> Sse<KeepAliveStream<SseStream>> {
    let events = stream.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","content":"event serialization failed"}"#.to_string()
        });
        Ok(Event::default().data(json))
    });
    Sse::new(Box::pin(events) as SseStream).keep_alive(KeepAlive::default())
}

async fn test_connection(Json(body): Json<TestConnectionRequest>) -> Json<TestResult> {
    match mockstage_provider::test_connection(&body.llm_config).await {
        Ok(()) => Json(TestResult {
            ok: true,
            message: format!("connected to {}", body.llm_config.provider.as_str()),
        }),
        Err(e) => Json(TestResult {
            ok: false,
            message: e.to_string(),
        }),
    }
}

async fn start_interview(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<Sse<KeepAliveStream<SseStream>>, ApiError> {
    let (_session_id, stream) = state.engine.start(body.config, body.llm_config).await?;
    Ok(sse_from(stream))
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Sse<KeepAliveStream<SseStream>>, ApiError> {
    let stream = state
        .engine
        .send(&body.session_id, body.message, body.llm_config)
        .await?;
    Ok(sse_from(stream))
}

async fn evaluate_interview(
    State(state): State<AppState>,
    Json(body): Json<EvaluateRequest>,
) -> Result<Json<mockstage_schema::EvaluationReport>, ApiError> {
    let report = state
        .engine
        .evaluate(&body.session_id, body.llm_config)
        .await?;
    Ok(Json(report))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.engine.list_sessions())
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.engine.get_session(&id)?))
}

async fn abandon_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.abandon(&id)?;
    Ok(Json(serde_json::json!({ "status": "closed", "session_id": id })))
}
