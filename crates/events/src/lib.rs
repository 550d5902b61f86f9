//! `printforge-events`: event mechanics shared by the domain crates.
//!
//! Domain events themselves (order and print job events) live next to their
//! aggregates; this crate only knows how events are described, executed and
//! fanned out to in-process subscribers.

pub mod bus;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
