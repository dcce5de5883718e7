pub mod client;
pub mod dispatcher;
pub mod limits;
pub mod pump;
pub mod queue;
pub mod registry;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::{
    auth::{require_bearer_auth, AuthenticatedClient, SessionStore},
    metrics,
};
use client::ClientHandle;
use dispatcher::DispatcherHandle;
use limits::ConnectionLimits;
use pump::{read_pump, write_pump, PumpError};
use registry::ClientRegistry;

#[derive(Clone)]
struct WsRouterState {
    registry: ClientRegistry,
    dispatcher: DispatcherHandle,
    limits: ConnectionLimits,
}

pub fn router(
    sessions: SessionStore,
    registry: ClientRegistry,
    dispatcher: DispatcherHandle,
    limits: ConnectionLimits,
) -> Router {
    let auth_layer = middleware::from_fn_with_state(sessions, require_bearer_auth);

    Router::new()
        .route("/ws", get(ws_upgrade).route_layer(auth_layer))
        .with_state(WsRouterState { registry, dispatcher, limits })
}

async fn ws_upgrade(
    Extension(client): Extension<AuthenticatedClient>,
    State(state): State<WsRouterState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_frame_bytes = state.limits.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, client.identity, state))
}

async fn handle_socket(socket: WebSocket, identity: String, state: WsRouterState) {
    let WsRouterState { registry, dispatcher, limits } = state;
    let (client, outbound) = ClientHandle::new(identity, limits.outbound_queue_capacity);
    registry.register(&client);
    metrics::increment_connections_opened();
    info!(
        client_id = %client.id(),
        identity = client.identity(),
        active_clients = registry.len(),
        "client connected"
    );

    let (sink, stream) = socket.split();

    let writer = {
        let client = Arc::clone(&client);
        let registry = registry.clone();
        tokio::spawn(async move {
            let result = write_pump(sink, outbound, limits).await;
            registry.release(&client, &exit_reason(&result));
            result
        })
    };

    let result = read_pump(stream, &client, &dispatcher, limits).await;
    registry.release(&client, &exit_reason(&result));

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(client_id = %client.id(), error = %error, "outbound pump stopped");
        }
        Err(join_error) => {
            warn!(client_id = %client.id(), ?join_error, "outbound pump panicked");
        }
    }
}

fn exit_reason(result: &Result<(), PumpError>) -> String {
    match result {
        Ok(()) => "connection closed".to_string(),
        Err(error) => error.to_string(),
    }
}
