use std::sync::{Mutex, PoisonError};

use murmur_common::protocol::ws::Message;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Bounded per-client FIFO drained by that client's outbound pump.
///
/// Closing drops the producer side: the pump drains whatever is already
/// queued and then sees end of stream.
#[derive(Debug)]
pub struct OutboundQueue {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
}

impl OutboundQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender: Mutex::new(Some(sender)) }, receiver)
    }

    /// Enqueues without waiting.
    pub fn try_push(&self, message: Message) -> Result<(), PushError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(PushError::Closed);
        };

        sender.try_send(message).map_err(|error| match error {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Enqueues, waiting for room if the queue is full.
    pub async fn push(&self, message: Message) -> Result<(), PushError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match sender {
            Some(sender) => sender.send(message).await.map_err(|_| PushError::Closed),
            None => Err(PushError::Closed),
        }
    }

    /// Returns true if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}
