pub mod credentials;
pub mod middleware;
pub mod session;

use thiserror::Error;

use crate::error::{ErrorCode, RelayError};

pub use credentials::{CredentialVerifier, StaticCredentials};
pub use middleware::{require_bearer_auth, AuthenticatedClient};
pub use session::SessionStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingBearer,
    #[error("unknown session token")]
    UnknownToken,
    #[error("session token expired")]
    ExpiredToken,
    #[error("invalid username or password")]
    InvalidCredentials,
}

impl From<AuthError> for RelayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => RelayError::from_code(ErrorCode::AuthInvalidCredentials),
            AuthError::MissingBearer => {
                RelayError::new(ErrorCode::AuthInvalidToken, error.to_string())
            }
            // Unknown and expired tokens are indistinguishable to the caller.
            AuthError::UnknownToken | AuthError::ExpiredToken => {
                RelayError::from_code(ErrorCode::AuthInvalidToken)
            }
        }
    }
}
