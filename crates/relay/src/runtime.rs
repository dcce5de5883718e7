use std::{future::Future, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    app::{build_router, shutdown_signal, RelayState},
    config::RelayConfig,
    cors::cors_layer,
    metrics,
};

/// Binds the configured address and serves until SIGINT/SIGTERM.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    if config.is_dev_credentials() {
        warn!(
            "using the built-in development login; set MURMUR_RELAY_LOGIN_USERNAME and \
             MURMUR_RELAY_LOGIN_PASSWORD for any shared deployment"
        );
    }

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");
    serve(listener, &config, shutdown_signal()).await
}

/// Serves the relay on an already-bound listener until `shutdown` resolves.
///
/// Owns the background tasks: the broadcast dispatcher and, when enabled,
/// the expired-session sweep.
pub async fn serve<F>(
    listener: TcpListener,
    config: &RelayConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (state, dispatcher) = RelayState::from_config(config);
    metrics::set_global_metrics(Arc::clone(&state.metrics));

    let dispatcher_task = dispatcher.spawn();
    let sweeper =
        config.session_sweep_interval.map(|interval| state.sessions.spawn_sweeper(interval));

    let app = build_router(state).layer(cors_layer(config.cors_origins.as_deref()));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server failed");

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    dispatcher_task.abort();
    info!("relay server stopped");

    result
}
