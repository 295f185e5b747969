//! HTTP mapping for [`ChatError`], using the OpenAI error envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};

use crate::core::errors::ChatError;

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: String,
    #[serde(rename = "type")]
    kind: &'a str,
    code: u16,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(status = code, error = %self, "Request failed");
        } else {
            debug!(status = code, error = %self, "Request rejected");
        }
        let message = match &self {
            ChatError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let body = ErrorEnvelope {
            error: ErrorDetail {
                message,
                kind: self.kind(),
                code,
            },
        };
        (status, Json(body)).into_response()
    }
}
