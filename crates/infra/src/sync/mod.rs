//! Order ⇄ print job synchronization.
//!
//! The only writer of order and job status. See [`SyncEngine`].

pub mod engine;
pub mod error;
pub mod events;
mod session;

pub use engine::{Assignment, NewOrder, OrderView, QueueSummary, SyncEngine};
pub use error::SyncError;
pub use events::SyncEvent;
