// `murmur connect`: open a relay session, say hello, and print what comes back.

use std::{io, path::Path, time::Duration};

use anyhow::Context;
use clap::Args;
use futures_util::{SinkExt, StreamExt};
use murmur_common::protocol::ws::{
    decode_message, encode_message, Message, MessageKind, MAX_FRAME_BYTES,
};
use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::client;
use crate::output::{self, OutputFormat};
use crate::session_file;

use super::{block_on, DEFAULT_SERVER};

/// Listen windows too long for the clock are cut down to this.
const MAX_LISTEN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(
        "`{kind}` message encodes to {len} bytes but the relay accepts at most {max}; \
         shorten --message"
    )]
    MessageTooLarge { kind: MessageKind, len: usize, max: usize },
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Relay base URL. Defaults to the saved session's relay.
    #[arg(long)]
    server: Option<String>,
    /// Bearer token. Defaults to the saved session's token.
    #[arg(long)]
    token: Option<String>,
    /// Text to broadcast once connected.
    #[arg(long, default_value = "Hello, murmur!")]
    message: String,
    /// How long to keep printing incoming messages.
    #[arg(long, default_value_t = 10)]
    listen_secs: u64,
    /// Print raw message envelopes as JSON.
    #[arg(long)]
    json: bool,
}

/// Where to connect and with which token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    server: Url,
    token: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ExchangeSummary {
    received: usize,
    closed_by_relay: bool,
}

pub fn run(args: ConnectArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let listen = Duration::from_secs(args.listen_secs);

    let result = resolve_target(
        args.server.as_deref(),
        args.token.as_deref(),
        session_file::default_session_path().as_deref(),
    )
    .and_then(|target| {
        block_on(exchange(&target, &args.message, listen, |message| {
            output::print_output(format, message, format_message)
        }))
    })
    .and_then(|result| result);

    match result {
        Ok(summary) => {
            debug!(received = summary.received, "connect finished");
            if summary.closed_by_relay {
                output::print_warning(
                    format,
                    "RELAY_CLOSED",
                    "relay closed the connection before the listen window ended",
                );
            }
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

/// Explicit flags win; anything missing comes from the saved session.
fn resolve_target(
    server: Option<&str>,
    token: Option<&str>,
    session_path: Option<&Path>,
) -> anyhow::Result<Target> {
    let saved = match (server, token, session_path) {
        (Some(_), Some(_), _) | (_, _, None) => None,
        (_, _, Some(path)) => session_file::load(path)?,
    };

    let token = match (token, &saved) {
        (Some(token), _) => token.to_string(),
        (None, Some(saved)) => saved.token.clone(),
        (None, None) => {
            anyhow::bail!("no saved session; run `murmur login` first or pass --token")
        }
    };
    let server = server
        .map(ToOwned::to_owned)
        .or_else(|| saved.map(|saved| saved.server))
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    Ok(Target { server: client::parse_server_url(&server)?, token })
}

/// Sends one `ping` and one `broadcast`, then hands every decoded
/// message to `on_message` until `listen` elapses or the relay hangs up.
async fn exchange<F>(
    target: &Target,
    text: &str,
    listen: Duration,
    mut on_message: F,
) -> anyhow::Result<ExchangeSummary>
where
    F: FnMut(&Message) -> io::Result<()>,
{
    let outgoing = [Message::ping(), Message::broadcast(text)]
        .into_iter()
        .map(|message| encode_frame(&message).map(|payload| (message.kind, payload)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut socket = client::connect(&target.server, &target.token).await?;
    for (kind, payload) in outgoing {
        socket
            .send(WsMessage::text(payload))
            .await
            .with_context(|| format!("failed to send `{kind}` message"))?;
    }

    let deadline = listen_deadline(Instant::now(), listen);
    let mut summary = ExchangeSummary::default();
    loop {
        let frame = match timeout_at(deadline, socket.next()).await {
            Err(_elapsed) => break,
            Ok(None) => {
                summary.closed_by_relay = true;
                break;
            }
            Ok(Some(frame)) => frame.context("websocket read failed")?,
        };

        match frame {
            WsMessage::Text(text) => match decode_message(text.as_str().as_bytes()) {
                Ok(message) => {
                    on_message(&message)?;
                    summary.received += 1;
                }
                Err(error) => warn!(%error, "skipping undecodable frame from relay"),
            },
            WsMessage::Close(frame) => {
                debug!(?frame, "relay closed the connection");
                summary.closed_by_relay = true;
                break;
            }
            _ => {}
        }
    }

    if !summary.closed_by_relay {
        if let Err(error) = socket.close(None).await {
            debug!(%error, "close handshake failed");
        }
    }
    Ok(summary)
}

/// Encodes `message`, refusing frames the relay would drop for size.
fn encode_frame(message: &Message) -> anyhow::Result<String> {
    let payload = encode_message(message).context("failed to encode message")?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ConnectError::MessageTooLarge {
            kind: message.kind.clone(),
            len: payload.len(),
            max: MAX_FRAME_BYTES,
        }
        .into());
    }
    Ok(payload)
}

fn listen_deadline(start: Instant, listen: Duration) -> Instant {
    start.checked_add(listen.min(MAX_LISTEN)).unwrap_or(start)
}

fn format_message(message: &Message) -> String {
    match &message.kind {
        MessageKind::Pong => "pong".to_string(),
        kind => format!("{kind}: {}", data_text(&message.data)),
    }
}

fn data_text(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
