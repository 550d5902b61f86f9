use std::collections::HashMap;
use std::sync::RwLock;

use printforge_core::{AggregateRoot, ExpectedVersion, OrderId, PrintJobId, PrinterId};
use printforge_orders::Order;
use printforge_printing::{PrintJob, Printer};

use super::{
    ChangeSet, JobFilter, OrderStore, PrintJobStore, PrinterStore, StatusUpdateLog, StoreError,
    SyncStore, queue_order,
};
use crate::audit::StatusUpdate;

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    jobs: HashMap<PrintJobId, PrintJob>,
    printers: HashMap<PrinterId, Printer>,
    updates: Vec<StatusUpdate>,
}

/// In-memory store for tests/dev.
///
/// A single `RwLock` over all tables makes `commit` trivially atomic.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    tables: RwLock<Tables>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Number of audit rows (tests).
    pub fn update_count(&self) -> usize {
        self.read().map(|t| t.updates.len()).unwrap_or(0)
    }
}

fn check(
    kind: &str,
    id: impl core::fmt::Display,
    expected: ExpectedVersion,
    actual: Option<u64>,
) -> Result<(), StoreError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{kind} {id}: expected {expected:?}, found {actual:?}"
        )))
    }
}

impl OrderStore for InMemorySyncStore {
    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn order_number_exists(&self, number: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.orders.values().any(|o| o.number() == number))
    }
}

impl PrintJobStore for InMemorySyncStore {
    fn get_job(&self, id: PrintJobId) -> Result<Option<PrintJob>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    fn jobs_for_order(&self, order_id: OrderId) -> Result<Vec<PrintJob>, StoreError> {
        let mut jobs: Vec<PrintJob> = self
            .read()?
            .jobs
            .values()
            .filter(|j| j.order_id() == Some(order_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(jobs)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PrintJob>, StoreError> {
        let mut jobs: Vec<PrintJob> = self
            .read()?
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(queue_order);
        Ok(jobs)
    }
}

impl PrinterStore for InMemorySyncStore {
    fn get_printer(&self, id: PrinterId) -> Result<Option<Printer>, StoreError> {
        Ok(self.read()?.printers.get(&id).cloned())
    }

    fn list_printers(&self) -> Result<Vec<Printer>, StoreError> {
        let mut printers: Vec<Printer> = self.read()?.printers.values().cloned().collect();
        printers.sort_by_key(Printer::id_typed);
        Ok(printers)
    }
}

impl StatusUpdateLog for InMemorySyncStore {
    fn updates_for_order(&self, order_id: OrderId) -> Result<Vec<StatusUpdate>, StoreError> {
        let mut updates: Vec<StatusUpdate> = self
            .read()?
            .updates
            .iter()
            .filter(|u| u.order_id == order_id)
            .cloned()
            .collect();
        // Stable: rows written in one change set share a timestamp.
        updates.sort_by_key(|u| u.occurred_at);
        Ok(updates)
    }
}

impl SyncStore for InMemorySyncStore {
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        // 1) Verify every expectation before touching anything.
        for w in &changes.orders {
            let id = w.entity.id_typed();
            check("order", id, w.expected, tables.orders.get(&id).map(|o| o.version()))?;
            let number_taken = tables
                .orders
                .values()
                .any(|o| o.id_typed() != id && o.number() == w.entity.number());
            if number_taken {
                return Err(StoreError::Conflict(format!(
                    "order number {} already exists",
                    w.entity.number()
                )));
            }
        }
        for w in &changes.jobs {
            let id = w.entity.id_typed();
            check("print job", id, w.expected, tables.jobs.get(&id).map(|j| j.version()))?;
        }
        for w in &changes.printers {
            let id = w.entity.id_typed();
            check("printer", id, w.expected, tables.printers.get(&id).map(|p| p.version()))?;
        }

        // 2) Apply.
        for w in changes.orders {
            tables.orders.insert(w.entity.id_typed(), w.entity);
        }
        for w in changes.jobs {
            tables.jobs.insert(w.entity.id_typed(), w.entity);
        }
        for w in changes.printers {
            tables.printers.insert(w.entity.id_typed(), w.entity);
        }
        tables.updates.extend(changes.updates);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use printforge_core::{Actor, Money, OrderItemId, UserId};
    use printforge_events::execute;
    use printforge_orders::{OrderCommand, OrderItem, PlaceOrder};

    use crate::audit::Subject;

    fn placed_order() -> Order {
        let id = OrderId::new();
        let mut order = Order::empty(id);
        execute(
            &mut order,
            &OrderCommand::Place(PlaceOrder {
                order_id: id,
                number: "PF-20240101-AAAAAA".to_string(),
                customer_id: UserId::new(),
                items: vec![OrderItem {
                    id: OrderItemId::new(),
                    product_name: "Vase".to_string(),
                    quantity: 1,
                    unit_price: Money::from_cents(1000),
                    on_demand: None,
                }],
                discount: Money::ZERO,
                shipping: Money::ZERO,
                payment_method: "pix".to_string(),
                notes: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        order
    }

    #[test]
    fn stale_write_rejects_whole_change_set() {
        let store = InMemorySyncStore::new();
        let order = placed_order();
        let id = order.id_typed();

        let mut first = ChangeSet::new();
        first.put_order(ExpectedVersion::New, order.clone());
        store.commit(first).unwrap();

        let mut stale = ChangeSet::new();
        stale.put_order(ExpectedVersion::New, order);
        stale.record(StatusUpdate::new(
            Subject::Order(id),
            id,
            "pending",
            "processing",
            Actor::System,
            Utc::now(),
        ));
        let err = store.commit(stale).unwrap_err();
        match err {
            StoreError::Conflict(msg) if msg.contains("order") => {}
            _ => panic!("Expected Conflict for stale order write"),
        }
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn timeline_is_scoped_to_order() {
        let store = InMemorySyncStore::new();
        let a = OrderId::new();
        let b = OrderId::new();
        let mut changes = ChangeSet::new();
        for order in [a, b] {
            changes.record(StatusUpdate::new(
                Subject::Order(order),
                order,
                "pending",
                "processing",
                Actor::System,
                Utc::now(),
            ));
        }
        store.commit(changes).unwrap();

        let timeline = store.updates_for_order(a).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].order_id, a);
    }
}
