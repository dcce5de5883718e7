// Per-connection read and write loops.
//
// The inbound pump owns the stream half of the socket, the outbound pump
// owns the sink half. Each returns the reason it stopped; tearing the
// client down is left to the caller.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{close_code, CloseFrame, Message as WsMessage},
    BoxError,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use murmur_common::protocol::ws::{decode_message, encode_message, Message, MessageKind};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{timeout, timeout_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::{client::ClientHandle, dispatcher::DispatcherHandle, limits::ConnectionLimits};
use crate::metrics;

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("websocket transport failed: {0}")]
    Transport(axum::Error),
    #[error("frame of {0} bytes exceeds the frame size limit")]
    Oversized(usize),
    #[error("no keepalive within the read deadline")]
    ReadDeadline,
    #[error("write did not complete within the write deadline")]
    WriteDeadline,
    #[error("queue closed")]
    QueueClosed,
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PumpError {
    fn transport(error: impl Into<BoxError>) -> Self {
        let error = axum::Error::new(error);
        if is_frame_size_violation(&error) {
            // The transport already refused the frame; its size is not reported.
            Self::Oversized(0)
        } else {
            Self::Transport(error)
        }
    }
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

/// Reads frames until the peer goes away, the read deadline passes, or
/// the client is closed from elsewhere.
pub async fn read_pump<S, E>(
    mut stream: S,
    client: &ClientHandle,
    dispatcher: &DispatcherHandle,
    limits: ConnectionLimits,
) -> Result<(), PumpError>
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Into<BoxError>,
{
    let mut deadline = Instant::now() + limits.pong_wait;

    loop {
        let next = tokio::select! {
            _ = client.closed() => return Ok(()),
            next = timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => return Err(PumpError::ReadDeadline),
            Ok(None) => return Ok(()),
            Ok(Some(Err(error))) => return Err(PumpError::transport(error)),
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            WsMessage::Pong(_) => {
                deadline = Instant::now() + limits.pong_wait;
                client.touch_liveness();
                continue;
            }
            // Transport pings are answered by the websocket layer.
            WsMessage::Ping(_) => continue,
            WsMessage::Close(_) => return Ok(()),
            data @ (WsMessage::Text(_) | WsMessage::Binary(_)) => data.into_data(),
        };

        if payload.len() > limits.max_frame_bytes {
            return Err(PumpError::Oversized(payload.len()));
        }

        let message = match decode_message(&payload) {
            Ok(message) => message,
            Err(error) => {
                metrics::increment_malformed_frames();
                warn!(
                    client_id = %client.id(),
                    error = %error,
                    "dropping malformed websocket frame"
                );
                continue;
            }
        };

        metrics::record_ws_frame(message.kind.as_str());
        match message.kind {
            MessageKind::Ping => {
                if client.outbound().push(Message::pong()).await.is_err() {
                    return Err(PumpError::QueueClosed);
                }
            }
            MessageKind::Broadcast => {
                let attributed = Message::attributed_broadcast(client.identity(), &message.data);
                if dispatcher.submit(attributed).await.is_err() {
                    return Err(PumpError::QueueClosed);
                }
            }
            other => {
                debug!(client_id = %client.id(), kind = %other, "ignoring unhandled message type");
            }
        }
    }
}

/// Drains `outbound` onto the socket and keeps the peer's liveness
/// deadline fresh with transport pings. Sends a close frame once the
/// queue is closed and drained.
pub async fn write_pump<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Message>,
    limits: ConnectionLimits,
) -> Result<(), PumpError>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: Into<BoxError>,
{
    let mut ping = tokio::time::interval_at(Instant::now() + limits.ping_period, limits.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(message) => {
                    let text = encode_message(&message)?;
                    write_frame(&mut sink, WsMessage::Text(text.into()), limits.write_wait).await?;
                }
                None => {
                    let close = WsMessage::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    }));
                    let _ = write_frame(&mut sink, close, limits.write_wait).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                write_frame(&mut sink, WsMessage::Ping(Bytes::new()), limits.write_wait).await?;
            }
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: WsMessage, write_wait: Duration) -> Result<(), PumpError>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: Into<BoxError>,
{
    match timeout(write_wait, sink.send(frame)).await {
        Err(_) => Err(PumpError::WriteDeadline),
        Ok(Err(error)) => Err(PumpError::transport(error)),
        Ok(Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use axum::extract::ws::Message as WsMessage;
    use futures_util::stream;
    use murmur_common::protocol::ws::{encode_message, Message};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{read_pump, write_pump, PumpError};
    use crate::ws::{
        client::ClientHandle,
        dispatcher::{Dispatcher, DispatcherHandle},
        limits::ConnectionLimits,
        registry::ClientRegistry,
    };

    fn text(message: &Message) -> Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(encode_message(message).expect("message should encode").into()))
    }

    fn raw(body: &str) -> Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(body.to_owned().into()))
    }

    fn dispatcher() -> (Dispatcher, DispatcherHandle) {
        Dispatcher::new(ClientRegistry::default(), 8)
    }

    #[tokio::test]
    async fn ping_enqueues_exactly_one_pong() {
        let (client, mut outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let frames = stream::iter(vec![text(&Message::ping())]);

        read_pump(frames, &client, &handle, ConnectionLimits::default())
            .await
            .expect("pump should end cleanly with the stream");

        assert_eq!(outbound.recv().await, Some(Message::pong()));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_is_attributed_and_submitted() {
        let registry = ClientRegistry::default();
        let (client, mut outbound) = ClientHandle::new("admin", 4);
        let (other, mut other_rx) = ClientHandle::new("other", 4);
        registry.register(&other);
        let (dispatcher, handle) = Dispatcher::new(registry, 8);
        let frames = stream::iter(vec![
            text(&Message::broadcast("hello")),
            text(&Message::broadcast(json!({"n": 1}))),
        ]);

        read_pump(frames, &client, &handle, ConnectionLimits::default())
            .await
            .expect("pump should end cleanly");
        drop(handle);
        dispatcher.run().await;

        assert_eq!(other_rx.recv().await, Some(Message::broadcast("admin: hello")));
        assert_eq!(other_rx.recv().await, Some(Message::broadcast(r#"admin: {"n":1}"#)));
        // The sender is not registered here, so nothing lands on its own queue.
        assert!(outbound.try_recv().is_err());
        drop(other);
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_skipped() {
        let (client, mut outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let frames = stream::iter(vec![
            raw("not json"),
            raw(r#"{"data":"no type"}"#),
            raw(r#"{"type":"presence","data":{}}"#),
            Ok(WsMessage::Binary(br#"{"type":"ping"}"#.to_vec().into())),
        ]);

        read_pump(frames, &client, &handle, ConnectionLimits::default())
            .await
            .expect("malformed frames should not end the pump");

        assert_eq!(outbound.recv().await, Some(Message::pong()));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversized_frame_terminates_the_pump() {
        let (client, _outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let oversized = format!(r#"{{"type":"broadcast","data":"{}"}}"#, "x".repeat(600));
        let frames = stream::iter(vec![raw(&oversized), text(&Message::ping())]);

        let result = read_pump(frames, &client, &handle, ConnectionLimits::default()).await;

        assert!(matches!(result, Err(PumpError::Oversized(len)) if len > 512));
    }

    #[tokio::test]
    async fn close_frame_ends_the_pump() {
        let (client, mut outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let frames = stream::iter(vec![Ok(WsMessage::Close(None)), text(&Message::ping())]);

        read_pump(frames, &client, &handle, ConnectionLimits::default())
            .await
            .expect("close should end the pump cleanly");

        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_hits_read_deadline() {
        let (client, _outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let limits = ConnectionLimits { pong_wait: Duration::from_secs(60), ..Default::default() };

        let result =
            read_pump(stream::pending::<Result<WsMessage, axum::Error>>(), &client, &handle, limits)
                .await;

        assert!(matches!(result, Err(PumpError::ReadDeadline)));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_pong_extends_read_deadline() {
        let (client, _outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        let limits = ConnectionLimits { pong_wait: Duration::from_secs(10), ..Default::default() };
        let before = client.last_liveness();

        let frames = stream::unfold(0u8, |step| async move {
            match step {
                0 | 1 => {
                    tokio::time::sleep(Duration::from_secs(8)).await;
                    Some((Ok::<_, axum::Error>(WsMessage::Pong(Default::default())), step + 1))
                }
                _ => None,
            }
        });

        read_pump(Box::pin(frames), &client, &handle, limits)
            .await
            .expect("pongs within the deadline should keep the pump alive");
        assert!(client.last_liveness() >= before);
    }

    #[tokio::test]
    async fn closed_client_stops_the_read_pump() {
        let (client, _outbound) = ClientHandle::new("admin", 4);
        let (_dispatcher, handle) = dispatcher();
        client.mark_closed();

        read_pump(
            stream::pending::<Result<WsMessage, axum::Error>>(),
            &client,
            &handle,
            ConnectionLimits::default(),
        )
        .await
        .expect("closed client should end the pump cleanly");
    }

    fn recording_sink(
        frames: mpsc::UnboundedSender<WsMessage>,
    ) -> impl futures_util::Sink<WsMessage, Error = Infallible> + Unpin {
        Box::pin(futures_util::sink::unfold(frames, |frames, frame| async move {
            let _ = frames.send(frame);
            Ok::<_, Infallible>(frames)
        }))
    }

    #[tokio::test]
    async fn write_pump_drains_in_order_then_closes() {
        let (queue_tx, queue_rx) = mpsc::channel(4);
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        queue_tx.send(Message::pong()).await.expect("queue should accept");
        queue_tx.send(Message::broadcast("admin: hi")).await.expect("queue should accept");
        drop(queue_tx);

        write_pump(recording_sink(frames_tx), queue_rx, ConnectionLimits::default())
            .await
            .expect("write pump should finish cleanly");

        let mut written = Vec::new();
        while let Ok(frame) = frames_rx.try_recv() {
            written.push(frame);
        }
        assert_eq!(written.len(), 3);
        assert_eq!(written[0], WsMessage::Text(r#"{"type":"pong","data":"pong"}"#.into()));
        assert_eq!(
            written[1],
            WsMessage::Text(r#"{"type":"broadcast","data":"admin: hi"}"#.into())
        );
        assert!(matches!(written[2], WsMessage::Close(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_pump_sends_periodic_pings() {
        let (queue_tx, queue_rx) = mpsc::channel::<Message>(4);
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let limits = ConnectionLimits { ping_period: Duration::from_secs(5), ..Default::default() };

        let pump = tokio::spawn(write_pump(recording_sink(frames_tx), queue_rx, limits));
        tokio::time::sleep(Duration::from_secs(11)).await;
        drop(queue_tx);
        pump.await.expect("pump should join").expect("pump should finish cleanly");

        let mut pings = 0;
        while let Ok(frame) = frames_rx.try_recv() {
            if matches!(frame, WsMessage::Ping(_)) {
                pings += 1;
            }
        }
        assert_eq!(pings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_hits_write_deadline() {
        let (queue_tx, queue_rx) = mpsc::channel(4);
        queue_tx.send(Message::pong()).await.expect("queue should accept");
        let stalled = Box::pin(futures_util::sink::unfold((), |(), _frame: WsMessage| async move {
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(())
        }));

        let result = write_pump(stalled, queue_rx, ConnectionLimits::default()).await;

        assert!(matches!(result, Err(PumpError::WriteDeadline)));
    }
}
