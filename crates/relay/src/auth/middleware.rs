use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{AuthError, SessionStore};
use crate::{error::RelayError, metrics};

/// Identity resolved from a bearer token, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    pub identity: String,
}

pub async fn require_bearer_auth(
    State(sessions): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token.to_owned(),
        None => return reject(AuthError::MissingBearer),
    };

    let identity = match sessions.validate(&token).await {
        Ok(identity) => identity,
        Err(error) => return reject(error),
    };

    request.extensions_mut().insert(AuthenticatedClient { identity });

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn reject(error: AuthError) -> Response {
    debug!(reason = %error, "rejected unauthenticated request");
    metrics::increment_upgrade_rejections();
    RelayError::from(error).into_response()
}
