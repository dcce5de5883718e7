// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Protocol-level limits (frame size, deadlines) are
// constants in `ws::limits`; only deployment knobs live here.

use std::{net::SocketAddr, time::Duration};

use crate::ws::limits::{ConnectionLimits, DEFAULT_OUTBOUND_QUEUE_CAPACITY};

pub const DEV_LOGIN_USERNAME: &str = "admin";
pub const DEV_LOGIN_PASSWORD: &str = "123456";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 2 * 60 * 60;
/// Longest session lifetime the relay will honour.
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_SESSION_SWEEP_SECS: u64 = 10 * 60;
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `murmur_relay=debug`).
    pub log_filter: String,
    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,
    /// Identity accepted by `POST /login`.
    pub login_username: String,
    /// Password accepted by `POST /login`.
    pub login_password: String,
    /// Lifetime of an issued session token.
    pub session_ttl: Duration,
    /// Period of the expired-session sweep. `None` disables the sweep.
    pub session_sweep_interval: Option<Duration>,
    /// Capacity of the dispatcher's shared input queue.
    pub dispatch_queue_capacity: usize,
    /// Per-connection limits handed to the pumps.
    pub connection_limits: ConnectionLimits,
    /// Raw `MURMUR_RELAY_CORS_ORIGINS` value; `None` allows local dev origins.
    pub cors_origins: Option<String>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `MURMUR_RELAY_HOST` | `0.0.0.0` |
    /// | `MURMUR_RELAY_PORT` | `8443` |
    /// | `MURMUR_RELAY_LOG_FILTER` | `info` |
    /// | `MURMUR_RELAY_LOG_FORMAT` | `text` |
    /// | `MURMUR_RELAY_LOGIN_USERNAME` | `admin` |
    /// | `MURMUR_RELAY_LOGIN_PASSWORD` | dev-only placeholder |
    /// | `MURMUR_RELAY_SESSION_TTL_SECS` | `7200` (capped at 30 days) |
    /// | `MURMUR_RELAY_SESSION_SWEEP_SECS` | `600` (`0` disables) |
    /// | `MURMUR_RELAY_OUTBOUND_QUEUE` | `256` |
    /// | `MURMUR_RELAY_DISPATCH_QUEUE` | `1024` |
    /// | `MURMUR_RELAY_CORS_ORIGINS` | local dev origins |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("MURMUR_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_or(&env, "MURMUR_RELAY_PORT", 8443);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter = env("MURMUR_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = env("MURMUR_RELAY_LOG_FORMAT")
            .map(|raw| LogFormat::parse(&raw))
            .unwrap_or(LogFormat::Text);

        let login_username =
            env("MURMUR_RELAY_LOGIN_USERNAME").unwrap_or_else(|_| DEV_LOGIN_USERNAME.into());
        let login_password =
            env("MURMUR_RELAY_LOGIN_PASSWORD").unwrap_or_else(|_| DEV_LOGIN_PASSWORD.into());

        let ttl_secs = parse_or(&env, "MURMUR_RELAY_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS);
        let session_ttl = Duration::from_secs(match ttl_secs {
            0 => DEFAULT_SESSION_TTL_SECS,
            secs => secs.min(MAX_SESSION_TTL_SECS),
        });

        let sweep_secs =
            parse_or(&env, "MURMUR_RELAY_SESSION_SWEEP_SECS", DEFAULT_SESSION_SWEEP_SECS);
        let session_sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let dispatch_queue_capacity = parse_or(
            &env,
            "MURMUR_RELAY_DISPATCH_QUEUE",
            DEFAULT_DISPATCH_QUEUE_CAPACITY,
        )
        .max(1);
        let outbound_queue_capacity =
            parse_or(&env, "MURMUR_RELAY_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE_CAPACITY).max(1);
        let cors_origins =
            env("MURMUR_RELAY_CORS_ORIGINS").ok().filter(|value| !value.trim().is_empty());

        Self {
            listen_addr,
            log_filter,
            log_format,
            login_username,
            login_password,
            session_ttl,
            session_sweep_interval,
            dispatch_queue_capacity,
            connection_limits: ConnectionLimits {
                outbound_queue_capacity,
                ..ConnectionLimits::default()
            },
            cors_origins,
        }
    }

    /// Returns true when the built-in placeholder login is active.
    pub fn is_dev_credentials(&self) -> bool {
        self.login_username == DEV_LOGIN_USERNAME && self.login_password == DEV_LOGIN_PASSWORD
    }
}

fn parse_or<F, T>(env: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
{
    env(key).ok().and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}
