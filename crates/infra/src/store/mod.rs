//! Persistence boundary for orders, print jobs, printers and their audit log.
//!
//! Reads go through the narrow per-entity traits. Writes go through
//! [`SyncStore::commit`] only, which applies a whole [`ChangeSet`] atomically
//! with per-entity optimistic version checks. Only the sync engine and the
//! printer registry build change sets.

pub mod changeset;
pub mod in_memory;
pub mod postgres;

pub use changeset::{ChangeSet, Write};
pub use in_memory::InMemorySyncStore;
pub use postgres::PostgresSyncStore;

use thiserror::Error;

use printforge_core::{OrderId, PrintJobId, PrinterId};
use printforge_orders::Order;
use printforge_printing::{JobStatus, PrintJob, Printer};

use crate::audit::StatusUpdate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Version check failed or a unique key was taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Queue listing filter. Results are ordered by priority, then creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub order_id: Option<OrderId>,
    pub printer_id: Option<PrinterId>,
    /// Include terminal and superseded jobs.
    pub include_finished: bool,
}

impl JobFilter {
    pub fn matches(&self, job: &PrintJob) -> bool {
        if !self.include_finished && !job.is_active() {
            return false;
        }
        if self.status.is_some_and(|s| s != job.status()) {
            return false;
        }
        if self.order_id.is_some() && self.order_id != job.order_id() {
            return false;
        }
        if self.printer_id.is_some() && self.printer_id != job.printer_id() {
            return false;
        }
        true
    }
}

/// Queue order: priority 1 first, then oldest.
pub fn queue_order(a: &PrintJob, b: &PrintJob) -> core::cmp::Ordering {
    a.priority()
        .cmp(&b.priority())
        .then(a.created_at().cmp(&b.created_at()))
        .then(a.id_typed().cmp(&b.id_typed()))
}

pub trait OrderStore: Send + Sync {
    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    fn order_number_exists(&self, number: &str) -> Result<bool, StoreError>;
}

pub trait PrintJobStore: Send + Sync {
    fn get_job(&self, id: PrintJobId) -> Result<Option<PrintJob>, StoreError>;

    /// Every job of an order, superseded ones included, oldest first.
    fn jobs_for_order(&self, order_id: OrderId) -> Result<Vec<PrintJob>, StoreError>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PrintJob>, StoreError>;
}

pub trait PrinterStore: Send + Sync {
    fn get_printer(&self, id: PrinterId) -> Result<Option<Printer>, StoreError>;

    fn list_printers(&self) -> Result<Vec<Printer>, StoreError>;
}

pub trait StatusUpdateLog: Send + Sync {
    /// Updates of the order and all of its jobs, in time order.
    fn updates_for_order(&self, order_id: OrderId) -> Result<Vec<StatusUpdate>, StoreError>;
}

pub trait SyncStore: OrderStore + PrintJobStore + PrinterStore + StatusUpdateLog {
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
