//! `POST /api/chat/completions`: validate, relay, then save the exchange.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::conversations::ConversationGraph;
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{ConversationId, MessageId, UserId, blank_as_none};
use crate::core::types::{ExchangeMeta, GenerationParams, PathMessage};
use crate::llm::{ChunkStream, Credential};
use crate::relay::{CompletionRelay, SaveReport, save_frame};

use super::auth::{AuthenticatedIdentity, bearer_credential};
use super::state::AppState;

/// Whole-response save outcome: `saved` or `failed`.
pub const SAVE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-save-status");
/// Whole-response conversation id, when saved.
pub const CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("x-conversation-id");
/// Whole-response stored answer id, when saved.
pub const ANSWER_ID_HEADER: HeaderName = HeaderName::from_static("x-answer-id");
/// Whole-response saved branch ids, comma separated, root first.
pub const MESSAGE_IDS_HEADER: HeaderName = HeaderName::from_static("x-message-ids");

/// Completion request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionBody {
    /// Existing conversation; absent or blank for a new one.
    #[serde(default, alias = "id", deserialize_with = "blank_as_none")]
    pub conversation_id: Option<ConversationId>,
    /// Root→tip path.
    pub messages: Vec<PathMessage>,
    /// Target model.
    pub model: String,
    /// Token budget.
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Stream chunks as server-sent events.
    #[serde(default)]
    pub stream: bool,
    /// Persist the exchange once the answer is complete.
    #[serde(default)]
    pub save: bool,
}

/// Everything a validated request carries into the relay.
struct Exchange {
    uid: UserId,
    meta: ExchangeMeta,
    path: Vec<PathMessage>,
    save: bool,
}

/// Handle a completion request.
///
/// Every check that can reject the request runs before the provider is called.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    AuthenticatedIdentity(uid): AuthenticatedIdentity,
    headers: HeaderMap,
    payload: Result<Json<CompletionBody>, JsonRejection>,
) -> Result<Response, ChatError> {
    let Json(body) = payload.map_err(|rejection| ChatError::Validation(rejection.body_text()))?;
    let credential = bearer_credential(&headers)?;
    if body.model.trim().is_empty() {
        return Err(ChatError::Validation("model must not be empty".to_string()));
    }
    let path = ConversationGraph::prepare_path(body.messages)?;
    if let Some(conversation_id) = &body.conversation_id {
        state.graph.ensure_owned(&uid, conversation_id).await?;
    }

    let exchange = Exchange {
        uid,
        meta: ExchangeMeta {
            conversation_id: body.conversation_id,
            params: GenerationParams {
                model: body.model,
                max_tokens: body.max_tokens,
                temperature: body.temperature,
            },
        },
        path,
        save: body.save,
    };
    debug!(
        uid = %exchange.uid,
        model = %exchange.meta.params.model,
        messages = exchange.path.len(),
        stream = body.stream,
        save = exchange.save,
        "Completion requested"
    );

    if body.stream {
        stream_completion(state, exchange, credential).await
    } else {
        whole_completion(&state, exchange, credential).await
    }
}

async fn whole_completion(
    state: &AppState,
    exchange: Exchange,
    credential: Credential,
) -> ChatResult<Response> {
    let response = state
        .relay
        .complete(&exchange.path, &exchange.meta.params, credential)
        .await?;

    let mut headers = HeaderMap::new();
    if exchange.save {
        let answer_id = MessageId::generate();
        let report = commit(state, &exchange, response.answer_text(), &answer_id).await;
        let status = if report.saved { "saved" } else { "failed" };
        headers.insert(SAVE_STATUS_HEADER, HeaderValue::from_static(status));
        if let Some(conversation_id) = &report.conversation_id {
            insert_header(&mut headers, CONVERSATION_ID_HEADER, conversation_id.as_str());
            insert_header(&mut headers, ANSWER_ID_HEADER, answer_id.as_str());
            let ids: Vec<&str> = report.message_ids.iter().map(MessageId::as_str).collect();
            insert_header(&mut headers, MESSAGE_IDS_HEADER, &ids.join(","));
        }
    }
    Ok((headers, Json(response)).into_response())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(header) => {
            headers.insert(name, header);
        }
        Err(err) => warn!(header = %name, error = %err, "Header value rejected"),
    }
}

async fn stream_completion(
    state: Arc<AppState>,
    exchange: Exchange,
    credential: Credential,
) -> ChatResult<Response> {
    let upstream: ChunkStream = state
        .relay
        .open_stream(&exchange.path, &exchange.meta.params, credential)
        .await?;
    let (tx, rx) = mpsc::channel::<String>(state.config.server.stream_buffer);
    let answer_id = MessageId::generate();

    tokio::spawn(async move {
        let outcome = CompletionRelay::forward(answer_id, upstream, &tx).await;
        if !exchange.save {
            return;
        }
        if !outcome.is_completed() {
            info!(answer = %outcome.answer_id, termination = ?outcome.termination, "Stream incomplete, exchange not saved");
            return;
        }
        let report = commit(&state, &exchange, &outcome.text, &outcome.answer_id).await;
        match save_frame(&report) {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    debug!(answer = %outcome.answer_id, "Caller left before the save event");
                }
            }
            Err(err) => warn!(error = %err, "Save event could not be framed"),
        }
    });

    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<_, Infallible>(frame), rx))
    });
    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// Commit an exchange; failures are logged and reported, never raised.
async fn commit(
    state: &AppState,
    exchange: &Exchange,
    answer_text: &str,
    answer_id: &MessageId,
) -> SaveReport {
    match state
        .coordinator
        .commit_exchange(
            &exchange.uid,
            &exchange.meta,
            &exchange.path,
            answer_text,
            answer_id,
        )
        .await
    {
        Ok(committed) => SaveReport::saved(committed.conversation_id, committed.message_ids),
        Err(err) => {
            error!(uid = %exchange.uid, answer = %answer_id, error = %err, "Exchange could not be saved");
            SaveReport::failed(err.to_string())
        }
    }
}
