use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use murmur_common::protocol::ws::Message;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::queue::OutboundQueue;

/// Server-side state for one authenticated connection.
#[derive(Debug)]
pub struct ClientHandle {
    id: Uuid,
    identity: String,
    connected_at: DateTime<Utc>,
    outbound: OutboundQueue,
    last_liveness: Mutex<DateTime<Utc>>,
    closed: watch::Sender<bool>,
}

impl ClientHandle {
    pub fn new(
        identity: impl Into<String>,
        outbound_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (outbound, receiver) = OutboundQueue::bounded(outbound_capacity);
        let now = Utc::now();
        let handle = Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            connected_at: now,
            outbound,
            last_liveness: Mutex::new(now),
            closed: watch::channel(false).0,
        };
        (Arc::new(handle), receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn touch_liveness(&self) {
        *self.last_liveness.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    pub fn last_liveness(&self) -> DateTime<Utc> {
        *self.last_liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flags the connection as finished. Returns true for the first caller only.
    pub fn mark_closed(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`ClientHandle::mark_closed`] has been called.
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}
