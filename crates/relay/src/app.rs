use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::{
    api,
    auth::{CredentialVerifier, SessionStore, StaticCredentials},
    config::RelayConfig,
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, RelayError,
    },
    metrics::{self, RelayMetrics},
    ws::{
        self,
        dispatcher::{Dispatcher, DispatcherHandle},
        limits::ConnectionLimits,
        registry::ClientRegistry,
    },
};

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct RelayState {
    pub sessions: SessionStore,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub registry: ClientRegistry,
    pub dispatcher: DispatcherHandle,
    pub limits: ConnectionLimits,
    pub metrics: Arc<RelayMetrics>,
}

impl RelayState {
    /// Builds the shared state plus the dispatcher that must be spawned
    /// for broadcasts to flow.
    pub fn new(
        sessions: SessionStore,
        credentials: Arc<dyn CredentialVerifier>,
        limits: ConnectionLimits,
        dispatch_queue_capacity: usize,
    ) -> (Self, Dispatcher) {
        let registry = ClientRegistry::default();
        let (dispatcher, handle) = Dispatcher::new(registry.clone(), dispatch_queue_capacity);
        let state = Self {
            sessions,
            credentials,
            registry,
            dispatcher: handle,
            limits,
            metrics: Arc::new(RelayMetrics::default()),
        };
        (state, dispatcher)
    }

    pub fn from_config(config: &RelayConfig) -> (Self, Dispatcher) {
        Self::new(
            SessionStore::new(config.session_ttl),
            Arc::new(StaticCredentials::new(&config.login_username, &config.login_password)),
            config.connection_limits,
            config.dispatch_queue_capacity,
        )
    }
}

pub fn build_router(state: RelayState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(Router::new().route("/metrics", get(render_metrics)).with_state(state.metrics))
            .merge(api::auth::router(state.sessions.clone(), state.credentials))
            .merge(ws::router(state.sessions, state.registry, state.dispatcher, state.limits))
            .fallback(not_found),
    )
}

pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], metrics.render_prometheus())
}

async fn not_found() -> RelayError {
    RelayError::from_code(ErrorCode::NotFound)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let endpoint = endpoint_label(&request);
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    metrics::record_http_request(method.as_str(), &endpoint, status, latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

/// Route template for metrics labels; unrouted paths collapse to one label.
fn endpoint_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| metrics::UNMATCHED_ENDPOINT.to_owned())
}
