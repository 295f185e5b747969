//! HTTP route handlers for the conversation API.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::core::errors::ChatError;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::types::{ConversationMeta, Message};

use super::auth::AuthenticatedIdentity;
use super::chat::chat_completions;
use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/completions", post(chat_completions))
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/{id}",
            get(get_conversation).delete(archive_conversation),
        )
        .route("/api/conversations/{id}/title", put(rename_conversation))
        .route("/api/conversations/{id}/current", put(select_node))
        .route(
            "/api/conversations/{id}/branches/{leaf_id}",
            get(get_branch),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "eureka",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// A conversation with every stored node, in creation order.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    /// Conversation metadata.
    pub meta: ConversationMeta,
    /// All message nodes, oldest first.
    pub messages: Vec<Message>,
}

/// Rename request.
#[derive(Debug, Deserialize)]
pub struct RenameBody {
    /// New title.
    pub title: String,
}

/// Cursor move request.
#[derive(Debug, Deserialize)]
pub struct SelectNodeBody {
    /// Node to show.
    #[serde(rename = "nodeId", alias = "node_id")]
    pub node_id: MessageId,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ChatError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ChatError::Validation(rejection.body_text()))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
) -> Result<Json<Vec<ConversationMeta>>, ChatError> {
    Ok(Json(state.graph.list_conversations(&uid).await?))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ChatError> {
    let (meta, messages) = state
        .graph
        .resolve_path(&ConversationId::from(id), &uid)
        .await?;
    Ok(Json(ConversationView { meta, messages }))
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    Path(id): Path<String>,
    payload: Result<Json<RenameBody>, JsonRejection>,
) -> Result<StatusCode, ChatError> {
    let body = json_body(payload)?;
    state
        .graph
        .rename_conversation(&uid, &ConversationId::from(id), &body.title)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_node(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    Path(id): Path<String>,
    payload: Result<Json<SelectNodeBody>, JsonRejection>,
) -> Result<StatusCode, ChatError> {
    let body = json_body(payload)?;
    state
        .graph
        .select_node(&uid, &ConversationId::from(id), &body.node_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_branch(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    Path((id, leaf_id)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let branch = state
        .graph
        .resolve_branch(&uid, &ConversationId::from(id), &MessageId::from(leaf_id))
        .await?;
    Ok(Json(branch))
}

async fn archive_conversation(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    Path(id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state
        .graph
        .archive_conversation(&uid, &ConversationId::from(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
