//! Per-connection outbound queues.
//!
//! Every connection's writer task owns the receiving half of a bounded
//! `mpsc` channel.  [`OutboundQueues`] keeps the sending halves by socket id
//! and implements [`Transport`], so the channel manager can queue frames
//! without ever awaiting socket I/O.
//!
//! A client that stops reading fills its own queue and nothing else.  Once
//! the queue is full the connection is cut loose: its sender is dropped, the
//! writer task flushes what it has and closes the socket, and every later
//! frame for that socket id is discarded.

use std::collections::HashMap;
use std::sync::RwLock;

use relay_core::SocketId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::application::ports::{Frame, Transport};

/// Frames buffered per connection when no capacity is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame to write.
    Frame(Frame),
    /// Send a WebSocket close frame with this code and reason, then stop.
    Close { code: u16, reason: String },
}

#[derive(Debug)]
pub struct OutboundQueues {
    capacity: usize,
    queues: RwLock<HashMap<SocketId, mpsc::Sender<Outbound>>>,
}

impl Default for OutboundQueues {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OutboundQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues holding at most `capacity` items each (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates the queue for `socket_id` and returns its receiving half.
    /// Replaces any previous queue for the same id.
    pub fn attach(&self, socket_id: &SocketId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.queues
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(socket_id.clone(), tx);
        rx
    }

    /// Drops the queue; the writer task sees the channel close.
    pub fn detach(&self, socket_id: &SocketId) {
        self.queues
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(socket_id);
    }

    /// Asks the writer task to close the socket.  Returns `false` if the
    /// connection has no queue.
    pub fn close(&self, socket_id: &SocketId, code: u16, reason: &str) -> bool {
        self.push(
            socket_id,
            Outbound::Close {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn len(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, socket_id: &SocketId, item: Outbound) -> bool {
        let result = {
            let queues = self
                .queues
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match queues.get(socket_id) {
                Some(tx) => tx.try_send(item),
                None => return false,
            }
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "outbound queue for {socket_id} is full ({} frames), disconnecting slow client",
                    self.capacity
                );
                self.detach(socket_id);
                false
            }
        }
    }
}

impl Transport for OutboundQueues {
    fn send(&self, socket_id: &SocketId, frame: &Frame) -> bool {
        let queued = self.push(socket_id, Outbound::Frame(frame.clone()));
        if !queued {
            debug!("dropping frame for {socket_id}: no live queue");
        }
        queued
    }
}
