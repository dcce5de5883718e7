use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use murmur_common::protocol::{
    auth::LoginResponse,
    ws::{decode_message, encode_message, Message},
};
use murmur_relay::{
    app::{build_router, RelayState},
    auth::{SessionStore, StaticCredentials},
    ws::{client::ClientHandle, limits::ConnectionLimits},
};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Error as WsError, Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    state: RelayState,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn start_relay(limits: ConnectionLimits) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");

    let (state, dispatcher) = RelayState::new(
        SessionStore::default(),
        Arc::new(StaticCredentials::new("admin", "123456")),
        limits,
        64,
    );
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("relay should serve");
    });

    TestRelay { addr, state, tasks: vec![server, dispatcher.spawn()] }
}

async fn login(addr: SocketAddr, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/login"))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .expect("login request should complete")
}

async fn login_token(addr: SocketAddr) -> String {
    let response = login(addr, "admin", "123456").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json::<LoginResponse>().await.expect("login body should decode").token
}

async fn connect(addr: SocketAddr, authorization: Option<&str>) -> Result<ClientSocket, WsError> {
    let mut request =
        format!("ws://{addr}/ws").into_client_request().expect("ws request should build");
    if let Some(value) = authorization {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header should be valid"));
    }
    connect_async(request).await.map(|(socket, _)| socket)
}

async fn connect_authorized(addr: SocketAddr, token: &str) -> ClientSocket {
    connect(addr, Some(&format!("Bearer {token}"))).await.expect("ws client should connect")
}

async fn send(socket: &mut ClientSocket, message: &Message) {
    let text = encode_message(message).expect("message should encode");
    socket.send(WsMessage::Text(text.into())).await.expect("client should send frame");
}

async fn ws_recv(socket: &mut ClientSocket) -> Message {
    loop {
        let next = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for websocket frame");
        let frame =
            next.expect("websocket should remain open").expect("websocket read should succeed");

        match frame {
            WsMessage::Text(text) => {
                return decode_message(text.as_bytes()).expect("server frame should decode")
            }
            WsMessage::Ping(payload) => {
                socket.send(WsMessage::Pong(payload)).await.expect("websocket should reply to ping");
            }
            WsMessage::Close(_) => panic!("websocket closed unexpectedly"),
            WsMessage::Binary(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

/// Asserts no application message arrives within `window`.
async fn assert_silent(socket: &mut ClientSocket, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, socket.next()).await {
            Err(_) => return,
            Ok(Some(Ok(WsMessage::Text(text)))) => panic!("unexpected message: {}", text.as_str()),
            Ok(Some(Ok(WsMessage::Ping(payload)))) => {
                socket.send(WsMessage::Pong(payload)).await.expect("websocket should reply to ping");
            }
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("websocket ended unexpectedly: {other:?}"),
        }
    }
}

/// Waits until the socket is closed by the server.
async fn wait_closed(socket: &mut ClientSocket) {
    loop {
        let next = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("server should close the connection");
        match next {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_for_registered(state: &RelayState, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while state.registry.len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry has {} clients, expected {expected}",
            state.registry.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn login_rejects_bad_credentials_without_issuing_a_token() {
    let relay = start_relay(ConnectionLimits::default()).await;

    let response = login(relay.addr, "admin", "wrong").await;

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await.expect("error body should be json");
    assert_eq!(body["error"]["code"], "AUTH_INVALID_CREDENTIALS");
    assert_eq!(relay.state.sessions.len().await, 0);
}

#[tokio::test]
async fn ping_yields_exactly_one_pong_on_the_same_connection() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut a = connect_authorized(relay.addr, &token).await;
    let mut b = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 2).await;

    send(&mut a, &Message::ping()).await;

    assert_eq!(ws_recv(&mut a).await, Message::pong());
    assert_silent(&mut a, Duration::from_millis(200)).await;
    assert_silent(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn broadcast_reaches_every_client_including_the_sender() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut sockets = Vec::new();
    for _ in 0..3 {
        sockets.push(connect_authorized(relay.addr, &token).await);
    }
    wait_for_registered(&relay.state, 3).await;

    send(&mut sockets[0], &Message::broadcast("Hello, murmur!")).await;

    for socket in &mut sockets {
        assert_eq!(ws_recv(socket).await, Message::broadcast("admin: Hello, murmur!"));
    }
}

#[tokio::test]
async fn per_client_order_is_preserved() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut sender = connect_authorized(relay.addr, &token).await;
    let mut observer = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 2).await;

    for n in 0..5 {
        send(&mut sender, &Message::broadcast(n)).await;
    }

    for n in 0..5 {
        assert_eq!(ws_recv(&mut observer).await, Message::broadcast(format!("admin: {n}")));
    }
}

#[tokio::test]
async fn upgrade_without_valid_bearer_is_rejected_before_registration() {
    let relay = start_relay(ConnectionLimits::default()).await;

    for authorization in [None, Some("Bearer not-a-token"), Some("Basic YWRtaW46MTIzNDU2")] {
        match connect(relay.addr, authorization).await {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED)
            }
            Err(other) => panic!("unexpected connect error: {other}"),
            Ok(_) => panic!("upgrade with {authorization:?} should be refused"),
        }
    }

    assert!(relay.state.registry.is_empty());
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_connection() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut socket = connect_authorized(relay.addr, &token).await;

    socket.send(WsMessage::Text("{not json".into())).await.expect("client should send");
    socket
        .send(WsMessage::Text(r#"{"type":"presence","data":1}"#.into()))
        .await
        .expect("client should send");
    send(&mut socket, &Message::ping()).await;

    assert_eq!(ws_recv(&mut socket).await, Message::pong());
}

#[tokio::test]
async fn oversized_frame_closes_only_that_connection() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut offender = connect_authorized(relay.addr, &token).await;
    let mut bystander = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 2).await;

    let oversized = format!(r#"{{"type":"broadcast","data":"{}"}}"#, "x".repeat(1024));
    let _ = offender.send(WsMessage::Text(oversized.into())).await;

    wait_closed(&mut offender).await;
    wait_for_registered(&relay.state, 1).await;
    send(&mut bystander, &Message::ping()).await;
    assert_eq!(ws_recv(&mut bystander).await, Message::pong());
}

#[tokio::test]
async fn slow_consumer_is_evicted_without_affecting_others() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut socket = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 1).await;

    // A member whose outbound queue is never drained.
    let (stalled, _undrained) = ClientHandle::new("stalled", 1);
    relay.state.registry.register(&stalled);

    send(&mut socket, &Message::broadcast("one")).await;
    assert_eq!(ws_recv(&mut socket).await, Message::broadcast("admin: one"));
    send(&mut socket, &Message::broadcast("two")).await;
    assert_eq!(ws_recv(&mut socket).await, Message::broadcast("admin: two"));

    assert!(!relay.state.registry.contains(stalled.id()));
    assert!(stalled.outbound().is_closed());
    assert_eq!(relay.state.registry.len(), 1);
}

#[tokio::test]
async fn disconnect_leaves_other_clients_untouched() {
    let relay = start_relay(ConnectionLimits::default()).await;
    let token = login_token(relay.addr).await;
    let mut leaving = connect_authorized(relay.addr, &token).await;
    let mut staying = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 2).await;

    leaving.close(None).await.expect("client should close");
    wait_for_registered(&relay.state, 1).await;

    send(&mut staying, &Message::broadcast("still here")).await;
    assert_eq!(ws_recv(&mut staying).await, Message::broadcast("admin: still here"));
}

#[tokio::test]
async fn silent_peer_is_dropped_after_the_read_deadline() {
    let limits = ConnectionLimits {
        pong_wait: Duration::from_millis(300),
        ping_period: Duration::from_secs(30),
        ..ConnectionLimits::default()
    };
    let relay = start_relay(limits).await;
    let token = login_token(relay.addr).await;
    let mut socket = connect_authorized(relay.addr, &token).await;
    wait_for_registered(&relay.state, 1).await;

    wait_closed(&mut socket).await;
    wait_for_registered(&relay.state, 0).await;
}

#[tokio::test]
async fn server_pings_keep_a_responsive_peer_alive() {
    let limits = ConnectionLimits {
        pong_wait: Duration::from_millis(400),
        ping_period: Duration::from_millis(100),
        ..ConnectionLimits::default()
    };
    let relay = start_relay(limits).await;
    let token = login_token(relay.addr).await;
    let mut socket = connect_authorized(relay.addr, &token).await;

    // Reading answers the server's pings for well past the read deadline.
    assert_silent(&mut socket, Duration::from_millis(1200)).await;

    send(&mut socket, &Message::ping()).await;
    assert_eq!(ws_recv(&mut socket).await, Message::pong());
    assert_eq!(relay.state.registry.len(), 1);
}
