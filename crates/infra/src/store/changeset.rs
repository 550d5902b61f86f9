use printforge_core::{ExpectedVersion, OrderId, PrintJobId, PrinterId};
use printforge_orders::Order;
use printforge_printing::{PrintJob, Printer};

use crate::audit::StatusUpdate;

/// A snapshot to persist, guarded by the version it was loaded at.
#[derive(Debug, Clone)]
pub struct Write<T> {
    pub expected: ExpectedVersion,
    pub entity: T,
}

/// Everything one engine operation changes.
///
/// Stores apply a change set atomically: every version check passes and
/// every write lands, or nothing does.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub orders: Vec<Write<Order>>,
    pub jobs: Vec<Write<PrintJob>>,
    pub printers: Vec<Write<Printer>>,
    pub updates: Vec<StatusUpdate>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an order. Re-staging the same order keeps the first expectation.
    pub fn put_order(&mut self, expected: ExpectedVersion, order: Order) {
        let id = order.id_typed();
        match self.orders.iter_mut().find(|w| w.entity.id_typed() == id) {
            Some(existing) => existing.entity = order,
            None => self.orders.push(Write {
                expected,
                entity: order,
            }),
        }
    }

    pub fn put_job(&mut self, expected: ExpectedVersion, job: PrintJob) {
        let id = job.id_typed();
        match self.jobs.iter_mut().find(|w| w.entity.id_typed() == id) {
            Some(existing) => existing.entity = job,
            None => self.jobs.push(Write {
                expected,
                entity: job,
            }),
        }
    }

    pub fn put_printer(&mut self, expected: ExpectedVersion, printer: Printer) {
        let id = printer.id_typed();
        match self.printers.iter_mut().find(|w| w.entity.id_typed() == id) {
            Some(existing) => existing.entity = printer,
            None => self.printers.push(Write {
                expected,
                entity: printer,
            }),
        }
    }

    pub fn record(&mut self, update: StatusUpdate) {
        self.updates.push(update);
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders
            .iter()
            .find(|w| w.entity.id_typed() == id)
            .map(|w| &w.entity)
    }

    pub fn job(&self, id: PrintJobId) -> Option<&PrintJob> {
        self.jobs
            .iter()
            .find(|w| w.entity.id_typed() == id)
            .map(|w| &w.entity)
    }

    pub fn printer(&self, id: PrinterId) -> Option<&Printer> {
        self.printers
            .iter()
            .find(|w| w.entity.id_typed() == id)
            .map(|w| &w.entity)
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.jobs.is_empty()
            && self.printers.is_empty()
            && self.updates.is_empty()
    }
}
