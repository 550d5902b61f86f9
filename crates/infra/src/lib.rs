//! Infrastructure layer: stores, locking and the services that coordinate
//! orders, print jobs, printers and customer notifications.

pub mod audit;
pub mod config;
pub mod gateway;
pub mod locks;
pub mod notifications;
pub mod registry;
pub mod store;
pub mod sync;

pub use registry::{AssignmentError, PrinterRegistry, PrinterStatistics};
pub use sync::{SyncEngine, SyncError, SyncEvent};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod integration_tests;
