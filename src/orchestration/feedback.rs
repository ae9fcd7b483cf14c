//! Live user-feedback channel.
//!
//! The sequential executor drains operator messages between dispatch cycles
//! and folds them into the next task's framing. The queue is a bounded
//! crossbeam channel owned by the executor: producers never block the task
//! loop, and the loop never blocks waiting for chat input.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::{Error, Result};

pub const DEFAULT_CAPACITY: usize = 64;

/// Producer handle; clone freely across threads.
#[derive(Debug, Clone)]
pub struct FeedbackSender {
    tx: Sender<String>,
}

impl FeedbackSender {
    /// Enqueue a message without blocking. A full queue is an error the
    /// producer can surface to the operator.
    pub fn push(&self, message: impl Into<String>) -> Result<()> {
        match self.tx.try_send(message.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(Error::FeedbackQueueFull)
            }
        }
    }
}

/// Consumer side, owned by the executor.
#[derive(Debug)]
pub struct FeedbackQueue {
    rx: Receiver<String>,
}

impl FeedbackQueue {
    pub fn bounded(capacity: usize) -> (Self, FeedbackSender) {
        let (tx, rx) = bounded(capacity);
        (Self { rx }, FeedbackSender { tx })
    }

    pub fn with_default_capacity() -> (Self, FeedbackSender) {
        Self::bounded(DEFAULT_CAPACITY)
    }

    /// Drain everything currently queued, never blocking.
    pub fn drain(&self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
