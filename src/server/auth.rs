//! Caller identity and upstream credential extraction.
//!
//! Sessions are handled in front of this service; it only trusts the user id
//! header the session layer sets.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::UserId;
use crate::llm::Credential;

use super::state::AppState;

/// User id of the authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedIdentity(pub UserId);

impl FromRequestParts<Arc<AppState>> for AuthenticatedIdentity {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = state.config.server.identity_header.as_str();
        parts
            .headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(UserId::from(value)))
            .ok_or_else(|| ChatError::Unauthorized(format!("missing {header} header")))
    }
}

/// Read the pass-through `Authorization: Bearer` credential.
///
/// # Errors
/// Returns `Validation` when the header is missing or not a bearer token.
pub fn bearer_credential(headers: &HeaderMap) -> ChatResult<Credential> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(Credential::from_bearer)
        .ok_or_else(|| ChatError::Validation("missing bearer credential".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_credential() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            bearer_credential(&headers),
            Err(ChatError::Validation(_))
        ));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-live"));
        assert_eq!(bearer_credential(&headers).unwrap().expose(), "sk-live");
    }
}
