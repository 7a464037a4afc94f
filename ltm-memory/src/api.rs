//! REST API over the memory store, the reconciler and the agent

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::agent::MemoryAgent;
use crate::error::Error;
use crate::llm::ChatModel;
use crate::reconcile::MemoryUpdater;
use crate::store::MemoryStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    /// Absent when no completion service is configured
    pub updater: Option<Arc<MemoryUpdater>>,
    pub chat_model: Option<Arc<dyn ChatModel>>,
}

impl AppState {
    /// State with only direct memory access
    pub fn store_only(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            updater: None,
            chat_model: None,
        }
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/users", get(list_users))
        .route("/memory", put(put_memory))
        .route("/memory/:user_id", get(get_memory).delete(delete_memory))
        .route("/memory/:user_id/merge", post(merge_memory))
        .route("/chat", post(chat))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Errors ===

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
}

impl From<Error> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::ReconciliationFailed(_) | Error::Completion(_) => StatusCode::BAD_GATEWAY,
            Error::StorageUnavailable(_) | Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Json(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", err);
        }
        api_error(status, err.to_string())
    }
}

// === Handlers ===

async fn root() -> Json<Value> {
    Json(json!({
        "name": "Long-Term Memory API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "chat": "/chat",
            "users": "/users",
            "get_memory": "/memory/{user_id}",
            "update_memory": "/memory",
            "merge_memory": "/memory/{user_id}/merge",
            "delete_memory": "DELETE /memory/{user_id}",
            "clear_memory": "DELETE /memory/{user_id}?clear=true",
            "health": "/health"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "agent": "react" }))
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.store.list_users()?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub user_id: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

async fn get_memory(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<MemoryResponse> {
    let record = state.store.record(&user_id)?;

    Ok(Json(match record {
        Some(r) => MemoryResponse {
            user_id: r.user_id,
            memory: r.content,
            updated_at: Some(r.updated_at.to_rfc3339()),
        },
        None => MemoryResponse {
            user_id,
            memory: String::new(),
            updated_at: None,
        },
    }))
}

#[derive(Debug, Deserialize)]
struct MemoryUpdateRequest {
    user_id: String,
    memory: String,
}

async fn put_memory(
    State(state): State<AppState>,
    Json(req): Json<MemoryUpdateRequest>,
) -> ApiResult<MemoryResponse> {
    state.store.write(&req.user_id, &req.memory)?;
    let updated_at = state
        .store
        .record(&req.user_id)?
        .map(|r| r.updated_at.to_rfc3339());

    Ok(Json(MemoryResponse {
        user_id: req.user_id,
        memory: req.memory,
        updated_at,
    }))
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    clear: bool,
}

async fn delete_memory(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Value> {
    if query.clear {
        state.store.write(&user_id, "")?;
        Ok(Json(json!({ "message": format!("Memory cleared for user {}", user_id) })))
    } else {
        state.store.delete(&user_id)?;
        Ok(Json(json!({ "message": format!("Memory deleted for user {}", user_id) })))
    }
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    new_information: String,
}

async fn merge_memory(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<MergeRequest>,
) -> ApiResult<MemoryResponse> {
    let updater = state.updater.as_ref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "completion service not configured (set ANTHROPIC_API_KEY)",
        )
    })?;

    let memory = updater.update(&user_id, &req.new_information).await?;
    let updated_at = state
        .store
        .record(&user_id)?
        .map(|r| r.updated_at.to_rfc3339());

    Ok(Json(MemoryResponse {
        user_id,
        memory,
        updated_at,
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    user_id: String,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub memory_updated: bool,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequestBody>,
) -> ApiResult<ChatReply> {
    let (updater, model) = match (&state.updater, &state.chat_model) {
        (Some(updater), Some(model)) => (updater.clone(), model.clone()),
        _ => {
            return Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "chat model not configured (set ANTHROPIC_API_KEY)",
            ))
        }
    };

    if req.user_id.trim().is_empty() {
        return Err(Error::invalid_input("user_id must not be blank").into());
    }

    let mut agent = MemoryAgent::new(req.user_id, updater, model);
    let reply = agent.chat(&req.message).await?;

    Ok(Json(ChatReply {
        reply,
        memory_updated: agent.memory_updated(),
    }))
}
