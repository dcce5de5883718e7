// HTTP + WebSocket client for a murmur relay.

use std::time::Duration;

use anyhow::{Context, Result};
use murmur_common::protocol::auth::LoginResponse;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

pub type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures the CLI maps to dedicated exit codes.
#[derive(Debug, Error)]
pub enum RelayClientError {
    #[error("relay rejected the credentials or token ({0})")]
    Unauthorized(String),
    #[error("relay returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("could not reach relay at {server}")]
    Unreachable {
        server: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Parses a relay base URL, defaulting to `http://` when no scheme is given.
pub fn parse_server_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") { raw.to_string() } else { format!("http://{raw}") };
    let url =
        Url::parse(&with_scheme).with_context(|| format!("invalid relay URL `{raw}`"))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => anyhow::bail!("unsupported relay URL scheme `{other}`"),
    }
}

/// Maps a relay base URL to its `/ws` endpoint: http → ws, https → wss.
pub fn websocket_url(server: &Url) -> Result<Url> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("unsupported relay URL scheme `{other}`"),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow::anyhow!("cannot convert `{server}` to a websocket URL"))?;
    url.set_path(&join_path(server.path(), "ws"));
    url.set_query(None);
    Ok(url)
}

fn login_url(server: &Url) -> Result<Url> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|()| anyhow::anyhow!("cannot convert `{server}` to an HTTP URL"))?;
    url.set_path(&join_path(server.path(), "login"));
    Ok(url)
}

fn join_path(base: &str, leaf: &str) -> String {
    format!("{}/{leaf}", base.trim_end_matches('/'))
}

/// Exchanges a username/password for a bearer token.
pub async fn login(server: &Url, username: &str, password: &str) -> Result<String> {
    let url = login_url(server)?;
    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let response = http
        .post(url.clone())
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|error| RelayClientError::Unreachable {
            server: url.to_string(),
            source: error.into(),
        })?;

    let status = response.status();
    if status.is_success() {
        let body: LoginResponse =
            response.json().await.context("relay returned an unreadable login response")?;
        return Ok(body.token);
    }

    let message = error_message(response.text().await.unwrap_or_default());
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(RelayClientError::Unauthorized(message).into());
    }
    Err(RelayClientError::Http { status: status.as_u16(), message }.into())
}

/// Opens the relay websocket with `Authorization: Bearer <token>`.
pub async fn connect(server: &Url, token: &str) -> Result<RelaySocket> {
    let url = websocket_url(server)?;
    let mut request =
        url.as_str().into_client_request().context("failed to build websocket request")?;
    let header = HeaderValue::from_str(&format!("Bearer {token}"))
        .context("token contains characters not allowed in a header")?;
    request.headers_mut().insert(AUTHORIZATION, header);

    match connect_async(request).await {
        Ok((socket, _)) => Ok(socket),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            let message = error_message(body);
            if status == 401 {
                Err(RelayClientError::Unauthorized(message).into())
            } else {
                Err(RelayClientError::Http { status, message }.into())
            }
        }
        Err(error) => {
            Err(RelayClientError::Unreachable { server: url.to_string(), source: error.into() }
                .into())
        }
    }
}

/// Pulls `error.message` out of a relay error envelope, falling back to the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(ToOwned::to_owned))
        .unwrap_or(body)
}
