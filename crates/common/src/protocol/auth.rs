// HTTP login exchange shared by the relay and the CLI.

use serde::{Deserialize, Serialize};

/// Form body accepted by `POST /login`.
///
/// Absent fields decode as empty strings so that an incomplete form is
/// rejected as bad credentials rather than as a malformed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Successful `POST /login` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}
