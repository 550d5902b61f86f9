//! Event publishing/subscription abstraction (mechanics only).
//!
//! The sync engine publishes one message per committed status transition.
//! Subscribers (the notification dispatcher, realtime feeds) run on their own
//! threads and must tolerate duplicates: the bus is best-effort fan-out, the
//! status update log is the source of truth.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError};

/// A subscription to a bus.
///
/// Each subscription receives a copy of every message published after it was
/// created. Intended for a single consuming thread.
///
/// ```ignore
/// let sub = bus.subscribe();
/// while let Ok(event) = sub.recv() {
///     dispatcher.handle_sync_event(&event);
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub.
///
/// `publish` is called after the change set has been committed, so a failed
/// publish never rolls back state; callers log and move on.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
