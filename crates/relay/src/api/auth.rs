use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    routing::post,
    Form, Json, Router,
};
use murmur_common::protocol::auth::{LoginForm, LoginResponse};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::{CredentialVerifier, SessionStore},
    error::{ErrorCode, RelayError},
    metrics,
};

#[derive(Clone)]
struct LoginState {
    sessions: SessionStore,
    credentials: Arc<dyn CredentialVerifier>,
}

pub fn router(sessions: SessionStore, credentials: Arc<dyn CredentialVerifier>) -> Router {
    Router::new().route("/login", post(login)).with_state(LoginState { sessions, credentials })
}

async fn login(
    State(state): State<LoginState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<LoginResponse>, RelayError> {
    let Form(form) = form.map_err(|rejection| {
        RelayError::from_code(ErrorCode::ValidationFailed)
            .with_details(json!({ "reason": rejection.body_text() }))
    })?;

    match state.credentials.verify(&form.username, &form.password) {
        Ok(identity) => {
            let token = state.sessions.issue(&identity).await;
            metrics::increment_logins(true);
            info!(identity = %identity, "issued session token");
            Ok(Json(LoginResponse { token }))
        }
        Err(error) => {
            metrics::increment_logins(false);
            warn!(username = %form.username, "rejected login attempt");
            Err(error.into())
        }
    }
}
