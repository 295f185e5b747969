//! HTTP server for the conversation API.
//!
//! Provides REST endpoints for:
//! - Chat completions, whole or streamed as server-sent events
//! - Conversation listing, loading, renaming and archiving
//! - Branch navigation

pub mod auth;
pub mod chat;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::AuthenticatedIdentity;
pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::errors::{ChatError, ChatResult};

/// Start the HTTP server with graceful shutdown support.
///
/// The server will stop accepting new connections when `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server_with_shutdown<F>(state: Arc<AppState>, shutdown_signal: F) -> ChatResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cors = cors_layer(
        state.config.server.frontend_addr.as_deref(),
        &state.config.server.identity_header,
    )?;
    let port = state.config.server.port;

    let app: Router = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Eureka server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ChatError::InvalidConfig(format!("cannot bind {addr}: {err}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|err| ChatError::InvalidConfig(format!("server error: {err}")))?;

    Ok(())
}

/// Exact origin with credentials when a frontend is configured, anything otherwise.
fn cors_layer(frontend_addr: Option<&str>, identity_header: &str) -> ChatResult<CorsLayer> {
    let Some(addr) = frontend_addr else {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    };
    let origin = HeaderValue::from_str(addr.trim_end_matches('/'))
        .map_err(|err| ChatError::InvalidConfig(format!("frontend origin {addr}: {err}")))?;
    let identity = HeaderName::from_bytes(identity_header.as_bytes())
        .map_err(|err| ChatError::InvalidConfig(format!("identity header {identity_header}: {err}")))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, identity])
        .expose_headers([
            chat::SAVE_STATUS_HEADER,
            chat::CONVERSATION_ID_HEADER,
            chat::ANSWER_ID_HEADER,
            chat::MESSAGE_IDS_HEADER,
        ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_accepts_origins() {
        assert!(cors_layer(None, "x-user-id").is_ok());
        assert!(cors_layer(Some("http://localhost:5173/"), "x-user-id").is_ok());
        assert!(matches!(
            cors_layer(Some("http://localhost\n"), "x-user-id"),
            Err(ChatError::InvalidConfig(_))
        ));
    }
}
