use std::time::Duration;

pub use murmur_common::protocol::ws::MAX_FRAME_BYTES;
/// Idle window after which a silent connection is torn down.
pub const PONG_WAIT_SECS: u64 = 60;
/// Upper bound on a single outbound write.
pub const WRITE_WAIT_SECS: u64 = 10;
/// Transport ping cadence. Must stay below the pong wait.
pub const PING_PERIOD_SECS: u64 = PONG_WAIT_SECS * 9 / 10;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Per-connection limits applied by the pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_frame_bytes: usize,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub ping_period: Duration,
    pub outbound_queue_capacity: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            pong_wait: Duration::from_secs(PONG_WAIT_SECS),
            write_wait: Duration::from_secs(WRITE_WAIT_SECS),
            ping_period: Duration::from_secs(PING_PERIOD_SECS),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}
