// Broadcast fan-out.
//
// A single task drains the shared input queue and copies each message
// onto every registered client's outbound queue. Pushes never wait: a
// client whose queue is full is evicted on the spot.

use murmur_common::protocol::ws::Message;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use super::{
    queue::PushError,
    registry::{ClientRegistry, Membership},
};
use crate::metrics;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("broadcast dispatcher has stopped")]
pub struct DispatcherClosed;

/// Producer side of the dispatcher input queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<Message>,
}

impl DispatcherHandle {
    /// Queues a message for fan-out, waiting while the input queue is full.
    pub async fn submit(&self, message: Message) -> Result<(), DispatcherClosed> {
        self.sender.send(message).await.map_err(|_| DispatcherClosed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub evicted: usize,
}

pub struct Dispatcher {
    registry: ClientRegistry,
    inbox: mpsc::Receiver<Message>,
}

impl Dispatcher {
    pub fn new(registry: ClientRegistry, capacity: usize) -> (Self, DispatcherHandle) {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        (Self { registry, inbox }, DispatcherHandle { sender })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every [`DispatcherHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            self.fan_out(message);
        }
        debug!("broadcast dispatcher stopped");
    }

    fn fan_out(&self, message: Message) -> FanoutReport {
        let mut delivered = 0;
        let evicted = self.registry.for_each(|client| {
            match client.outbound().try_push(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    Membership::Keep
                }
                Err(PushError::Full) => {
                    warn!(
                        client_id = %client.id(),
                        identity = client.identity(),
                        "evicting slow consumer"
                    );
                    metrics::increment_slow_consumer_evictions();
                    client.outbound().close();
                    Membership::Evict
                }
                Err(PushError::Closed) => Membership::Evict,
            }
        });

        metrics::increment_broadcasts();
        metrics::add_fanout_deliveries(delivered as u64);
        FanoutReport { delivered, evicted }
    }
}
