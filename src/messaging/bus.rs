use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use super::CoreMessage;

/// Outcome of waiting on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Message(CoreMessage),
    /// The wait elapsed with nothing queued
    TimedOut,
    /// Every sender is gone
    Closed,
}

/// Receiving end of the melody queue, owned by the scheduler thread
pub struct MessageBus {
    receiver: Receiver<CoreMessage>,
}

impl MessageBus {
    /// Create the bus and the sender that input threads post through
    pub fn new() -> (Sender<CoreMessage>, Self) {
        let (sender, receiver) = unbounded();
        (sender, MessageBus { receiver })
    }

    /// Wait up to `wait` for a message; `None` blocks until one arrives.
    /// A zero wait only looks at what is already queued.
    pub fn receive(&self, wait: Option<Duration>) -> Received {
        match wait {
            None => match self.receiver.recv() {
                Ok(msg) => Received::Message(msg),
                Err(_) => Received::Closed,
            },
            Some(wait) if wait.is_zero() => match self.receiver.try_recv() {
                Ok(msg) => Received::Message(msg),
                Err(TryRecvError::Empty) => Received::TimedOut,
                Err(TryRecvError::Disconnected) => Received::Closed,
            },
            Some(wait) => match self.receiver.recv_timeout(wait) {
                Ok(msg) => Received::Message(msg),
                Err(RecvTimeoutError::Timeout) => Received::TimedOut,
                Err(RecvTimeoutError::Disconnected) => Received::Closed,
            },
        }
    }

    /// Take every message still queued
    pub fn drain(&self) -> Vec<CoreMessage> {
        self.receiver.try_iter().collect()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
