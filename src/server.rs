use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::crag::{CorrectiveRag, CragOutcome};
use crate::error::CragError;
use crate::logger::RunLogger;
use crate::models::{
    ChatRequest, ChatResponse, DocumentUpload, LogEntry, LogQuery, LogResponse, QueryRequest,
};
use crate::rag::index_manager::{IndexManager, IndexStatus};
use crate::rag::KnowledgeStore;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub struct AppState {
    pub crag: CorrectiveRag,
    pub store: Arc<dyn KnowledgeStore>,
    pub index_manager: Option<Arc<IndexManager>>,
    pub run_log: Option<RunLogger>,
    /// Reported as `model` in chat completion responses.
    pub model_name: String,
}

pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/query", post(query_handler))
        .route("/api/v1/chat/completions", post(chat_completion_handler))
        .route("/api/v1/documents", post(add_document_handler))
        .route("/api/v1/index", post(start_index_handler))
        .route("/api/v1/index/status", get(index_status_handler))
        .route("/api/v1/logs", get(query_logs_handler))
        .route("/api/health", get(health_check))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn error_response(err: CragError) -> (StatusCode, String) {
    let status = match &err {
        CragError::EmptyQuery => StatusCode::BAD_REQUEST,
        CragError::Llm { .. } => StatusCode::BAD_GATEWAY,
        CragError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        tracing::error!("Pipeline error: {}", err);
    }
    (status, err.to_string())
}

async fn run_pipeline(state: &AppState, query: &str) -> Result<CragOutcome, (StatusCode, String)> {
    let outcome = state.crag.run(query).await.map_err(error_response)?;

    if let Some(run_log) = &state.run_log {
        if let Err(e) = run_log.log_run(&LogEntry::from_outcome(&outcome)).await {
            tracing::error!("Logging error: {}", e);
        }
    }

    Ok(outcome)
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<CragOutcome> {
    let outcome = run_pipeline(&state, &request.query).await?;
    Ok(Json(outcome))
}

async fn chat_completion_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let user_message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .ok_or((StatusCode::BAD_REQUEST, "No user message found".to_string()))?;

    let outcome = run_pipeline(&state, &user_message.content).await?;
    Ok(Json(ChatResponse::from_answer(&state.model_name, outcome.answer)))
}

async fn add_document_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DocumentUpload>,
) -> ApiResult<serde_json::Value> {
    if payload.content.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Document content is empty".to_string()));
    }

    let id = payload.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut metadata = serde_json::Map::new();
    metadata.insert("title".to_string(), payload.title.into());
    if let Some(category) = payload.category {
        metadata.insert("category".to_string(), category.into());
    }

    state
        .store
        .add_document(&id, &payload.content, metadata)
        .await
        .map_err(|e| {
            tracing::error!("Document add error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Vector store error: {}", e))
        })?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "id": id
    })))
}

fn index_manager(state: &AppState) -> Result<Arc<IndexManager>, (StatusCode, String)> {
    state.index_manager.clone().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Indexing is not configured".to_string(),
    ))
}

async fn start_index_handler(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, String)> {
    let manager = index_manager(&state)?;
    manager
        .start_background()
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "started",
            "source_dir": manager.source_dir().display().to_string()
        })),
    ))
}

async fn index_status_handler(State(state): State<Arc<AppState>>) -> ApiResult<IndexStatus> {
    let manager = index_manager(&state)?;
    Ok(Json(manager.get_status().await))
}

async fn query_logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<LogResponse> {
    let run_log = state.run_log.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Run log is not configured".to_string(),
    ))?;

    let response = run_log.query_runs(&query).await.map_err(|e| {
        tracing::error!("Query logs error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {}", e))
    })?;

    Ok(Json(response))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let llm_healthy = state.crag.llm().health_check().await.unwrap_or(false);

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "llm": llm_healthy,
            "indexer": state.index_manager.is_some(),
            "run_log": state.run_log.is_some()
        }
    }))
}
