//! C6 — the adapter message queue. A bounded FIFO of driver events
//! (tag updates, write completions, plugin errors) between the I/O
//! side and whatever consumes it (REST handlers, the subscriber
//! fan-out). `tokio::sync::mpsc::channel` is the idiomatic bounded
//! MPSC — no hand-rolled condvar queue needed.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use crate::tags::TagValue;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum AdapterMessage {
    TagUpdated {
        group_name: String,
        tag_name: String,
        value: TagValue,
    },
    WriteCompleted {
        request_id: u64,
        tag_name: String,
        ok: bool,
    },
    GroupError {
        group_name: String,
        code: i32,
    },
}

/// Wraps a bounded `mpsc` channel with an overflow counter: `try_push`
/// returns the dropped message on a full queue so the caller can log
/// or free it.
pub struct AdapterQueue {
    sender: Sender<AdapterMessage>,
    receiver: tokio::sync::Mutex<Receiver<AdapterMessage>>,
    overflow_count: AtomicU64,
}

impl AdapterQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        AdapterQueue {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Non-blocking push; on a full queue, bumps the overflow counter
    /// and hands the message back rather than blocking the caller
    /// (normally a timer callback).
    pub fn try_push(&self, msg: AdapterMessage) -> Result<(), AdapterMessage> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                Err(msg)
            }
            Err(TrySendError::Closed(msg)) => Err(msg),
        }
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Consumer-side pop; awaits the next message, or `None` once every
    /// sender has dropped and the channel is drained.
    pub async fn pop(&self) -> Option<AdapterMessage> {
        self.receiver.lock().await.recv().await
    }

    pub fn sender(&self) -> Sender<AdapterMessage> {
        self.sender.clone()
    }
}
