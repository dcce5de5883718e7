use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    logins_total: Mutex<HashMap<String, u64>>,
    ws_frames_total: Mutex<HashMap<String, u64>>,
    upgrade_rejections_total: AtomicU64,
    connections_opened_total: AtomicU64,
    connections_closed_total: AtomicU64,
    malformed_frames_total: AtomicU64,
    broadcasts_total: AtomicU64,
    fanout_deliveries_total: AtomicU64,
    slow_consumer_evictions_total: AtomicU64,
    sessions_swept_total: AtomicU64,
}

/// Endpoint label for requests that matched no route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

const LOGIN_OUTCOMES: [&str; 2] = ["success", "failure"];
const FRAME_KINDS: [&str; 4] = ["ping", "pong", "broadcast", "other"];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            logins_total: Mutex::new(zeroed_labels(&LOGIN_OUTCOMES)),
            ws_frames_total: Mutex::new(zeroed_labels(&FRAME_KINDS)),
            upgrade_rejections_total: AtomicU64::new(0),
            connections_opened_total: AtomicU64::new(0),
            connections_closed_total: AtomicU64::new(0),
            malformed_frames_total: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            fanout_deliveries_total: AtomicU64::new(0),
            slow_consumer_evictions_total: AtomicU64::new(0),
            sessions_swept_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, endpoint, status_code, latency_ms);
    }
}

pub fn increment_logins(success: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_logins(success);
    }
}

pub fn increment_upgrade_rejections() {
    if let Some(metrics) = global_metrics() {
        metrics.upgrade_rejections_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_connections_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_opened_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_connections_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_closed_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_ws_frame(kind: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_frame(kind);
    }
}

pub fn increment_malformed_frames() {
    if let Some(metrics) = global_metrics() {
        metrics.malformed_frames_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_broadcasts() {
    if let Some(metrics) = global_metrics() {
        metrics.broadcasts_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn add_fanout_deliveries(delivered: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.fanout_deliveries_total.fetch_add(delivered, Ordering::SeqCst);
    }
}

pub fn increment_slow_consumer_evictions() {
    if let Some(metrics) = global_metrics() {
        metrics.slow_consumer_evictions_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn add_sessions_swept(swept: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.sessions_swept_total.fetch_add(swept, Ordering::SeqCst);
    }
}

impl RelayMetrics {
    /// `endpoint` must be a route template or [`UNMATCHED_ENDPOINT`], never a raw path.
    pub fn record_http_request(
        &self,
        method: &str,
        endpoint: &str,
        status_code: u16,
        latency_ms: u64,
    ) {
        let key =
            EndpointMetricKey { endpoint: endpoint.to_owned(), method: method.to_ascii_uppercase() };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn increment_logins(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        increment_label_counter(&self.logins_total, outcome, 1);
    }

    pub fn record_ws_frame(&self, kind: &str) {
        let normalized = if FRAME_KINDS.contains(&kind) { kind } else { "other" };
        increment_label_counter(&self.ws_frames_total, normalized, 1);
    }

    pub fn active_connections(&self) -> u64 {
        let opened = self.connections_opened_total.load(Ordering::SeqCst);
        let closed = self.connections_closed_total.load(Ordering::SeqCst);
        opened.saturating_sub(closed)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_logins_total Login attempts by outcome.\n");
        output.push_str("# TYPE relay_logins_total counter\n");
        append_label_counter_lines(&mut output, "relay_logins_total", "outcome", &self.logins_total);

        append_scalar(
            &mut output,
            "relay_upgrade_rejections_total",
            "counter",
            "WebSocket upgrades rejected for missing or invalid tokens.",
            self.upgrade_rejections_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_connections_opened_total",
            "counter",
            "Client connections registered.",
            self.connections_opened_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_connections_closed_total",
            "counter",
            "Client connections released.",
            self.connections_closed_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_active_connections",
            "gauge",
            "Currently registered client connections.",
            self.active_connections(),
        );

        output.push_str("# HELP relay_ws_frames_total Inbound websocket messages by type.\n");
        output.push_str("# TYPE relay_ws_frames_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_frames_total", "kind", &self.ws_frames_total);

        append_scalar(
            &mut output,
            "relay_malformed_frames_total",
            "counter",
            "Inbound frames that failed to decode.",
            self.malformed_frames_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_broadcasts_total",
            "counter",
            "Broadcasts fanned out by the dispatcher.",
            self.broadcasts_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_fanout_deliveries_total",
            "counter",
            "Broadcast copies enqueued to client outbound queues.",
            self.fanout_deliveries_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_slow_consumer_evictions_total",
            "counter",
            "Clients dropped because their outbound queue was full.",
            self.slow_consumer_evictions_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "relay_sessions_swept_total",
            "counter",
            "Expired sessions removed by the background sweep.",
            self.sessions_swept_total.load(Ordering::SeqCst),
        );

        output
    }
}

fn zeroed_labels(labels: &[&str]) -> HashMap<String, u64> {
    labels.iter().map(|label| (label.to_string(), 0)).collect()
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_scalar(output: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} {kind}\n"));
    output.push_str(&format!("{name} {value}\n"));
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
