use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use printforge_auth::{AuthContext, Permission};
use printforge_core::{Money, OrderId, OrderItemId, PrintJobId, PrinterId, UserId};
use printforge_events::{EventBus, execute};
use printforge_orders::{
    NewOrderItem, Order, OrderCommand, OrderItem, OrderStatus, PaymentGateway, PaymentStatus,
    PlaceOrder, format_order_number, map_gateway_status,
};
use printforge_printing::{
    AddJobNote, ChangeJobStatus, CreatePrintJob, JobStatus, MarkSuperseded, PrintJob,
    PrintJobCommand, RecordMaterialUsed, ReportProgress, ScheduleJob, SetJobPriority,
};

use super::error::SyncError;
use super::events::SyncEvent;
use super::session::{OrderSession, Outcome};
use crate::audit::StatusUpdate;
use crate::locks::{KeyedLocks, LockKey};
use crate::registry::PrinterRegistry;
use crate::store::{JobFilter, SyncStore};

const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;
const ORDER_NUMBER_ATTEMPTS: usize = 8;

/// Checkout input.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer_id: UserId,
    pub items: Vec<NewOrderItem>,
    pub discount: Money,
    pub shipping: Money,
    pub payment_method: String,
    pub notes: Option<String>,
}

/// An order with its jobs, as returned by creation and reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub jobs: Vec<PrintJob>,
    /// Fresh recomputation; equals `order.status()` unless something bypassed the engine.
    pub aggregate_status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub job_id: PrintJobId,
    pub printer_id: PrinterId,
}

/// Result of queueing every on-demand item of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub created: Vec<PrintJobId>,
    pub assigned: Vec<Assignment>,
    /// Active jobs still waiting for a printer.
    pub unassigned: Vec<PrintJobId>,
}

/// Keeps orders and their print jobs consistent.
///
/// Every mutating call locks the order, loads it with all of its jobs,
/// applies the request plus its counter-propagation, and commits the
/// net result as one change set. Events are published only after commit.
pub struct SyncEngine<B> {
    store: Arc<dyn SyncStore>,
    bus: B,
    locks: Arc<KeyedLocks<LockKey>>,
    registry: PrinterRegistry,
}

impl<B> SyncEngine<B>
where
    B: EventBus<SyncEvent>,
{
    pub fn new(store: Arc<dyn SyncStore>, bus: B) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let registry = PrinterRegistry::new(store.clone(), locks.clone());
        Self {
            store,
            bus,
            locks,
            registry,
        }
    }

    /// Registry sharing this engine's store and lock table.
    pub fn registry(&self) -> &PrinterRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────────

    /// Checkout: place the order and materialize one pending job per on-demand item.
    pub fn create_order(&self, input: NewOrder, auth: &AuthContext) -> Result<OrderView, SyncError> {
        let result = (|| -> Result<OrderView, SyncError> {
            auth.require_owner_or(input.customer_id, &Permission::ORDERS_STATUS_WRITE)?;
            let at = Utc::now();
            let order_id = OrderId::new();
            let number = self.generate_order_number(at)?;
            let items: Vec<OrderItem> = input
                .items
                .into_iter()
                .map(|item| OrderItem::from_new(OrderItemId::new(), item))
                .collect();

            let mut order = Order::empty(order_id);
            execute(
                &mut order,
                &OrderCommand::Place(PlaceOrder {
                    order_id,
                    number,
                    customer_id: input.customer_id,
                    items,
                    discount: input.discount,
                    shipping: input.shipping,
                    payment_method: input.payment_method,
                    notes: input.notes,
                    occurred_at: at,
                }),
            )?;

            let mut session = OrderSession::placed(self.store.as_ref(), order, auth.actor(), at);
            let item_ids: Vec<OrderItemId> =
                session.order().on_demand_items().map(|i| i.id).collect();
            for item_id in item_ids {
                queue_item(&mut session, item_id)?;
            }
            session.reconcile()?;

            let outcome = self.commit(session)?;
            info!(
                order_id = %outcome.order.id_typed(),
                number = outcome.order.number(),
                jobs = outcome.jobs.len(),
                "order placed"
            );
            Ok(view(outcome.order, outcome.jobs))
        })();
        logged("create_order", result)
    }

    /// Request an order status. The request is translated into the fact it
    /// stands for (payment, cancellation, fulfilment) and the stored status is
    /// re-derived; jobs follow the new facts.
    pub fn apply_order_status_change(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        reason: Option<String>,
        auth: &AuthContext,
    ) -> Result<Order, SyncError> {
        let result = self.locks.with_lock(LockKey::Order(order_id), || -> Result<Order, SyncError> {
            let mut s = self.session(order_id, auth)?;
            authorize_status_request(auth, s.order(), to)?;
            let at = s.at();
            s.exec_order(OrderCommand::RequestStatus {
                to,
                reason,
                occurred_at: at,
            })?;
            settle(&mut s)?;
            Ok(self.commit(s)?.order)
        });
        logged("apply_order_status_change", result)
    }

    /// Feed a payment provider status through the mapping table.
    ///
    /// Statuses the table does not know leave the order untouched.
    pub fn apply_payment_status(
        &self,
        order_id: OrderId,
        provider_status: &str,
        auth: &AuthContext,
    ) -> Result<Order, SyncError> {
        let result = (|| -> Result<Order, SyncError> {
            auth.require(&Permission::ORDERS_PAYMENT_WRITE)?;
            let Some(status) = map_gateway_status(provider_status) else {
                warn!(order_id = %order_id, provider_status, "unmapped payment status ignored");
                return self.load_order(order_id);
            };
            self.record_payment(order_id, status, auth)
        })();
        logged("apply_payment_status", result)
    }

    /// Ask `gateway` for a transaction's status and apply it.
    pub fn reconcile_payment(
        &self,
        gateway: &dyn PaymentGateway,
        order_id: OrderId,
        transaction_id: &str,
        auth: &AuthContext,
    ) -> Result<Order, SyncError> {
        auth.require(&Permission::ORDERS_PAYMENT_WRITE)?;
        let provider_status = gateway
            .check_transaction_status(transaction_id)
            .map_err(|e| SyncError::Gateway(format!("{}: {e}", gateway.name())))?;
        debug!(order_id = %order_id, gateway = gateway.name(), provider_status, "payment status polled");
        self.apply_payment_status(order_id, &provider_status, auth)
    }

    fn record_payment(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
        auth: &AuthContext,
    ) -> Result<Order, SyncError> {
        self.locks.with_lock(LockKey::Order(order_id), || -> Result<Order, SyncError> {
            let mut s = self.session(order_id, auth)?;
            let at = s.at();
            s.exec_order(OrderCommand::RecordPayment {
                status,
                occurred_at: at,
            })?;
            settle(&mut s)?;
            Ok(self.commit(s)?.order)
        })
    }

    /// Pin an order status until cleared. Jobs are not touched.
    pub fn override_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        reason: String,
        auth: &AuthContext,
    ) -> Result<Order, SyncError> {
        let result = self.locks.with_lock(LockKey::Order(order_id), || -> Result<Order, SyncError> {
            auth.require(&Permission::ORDERS_OVERRIDE)?;
            let mut s = self.session(order_id, auth)?;
            let at = s.at();
            s.exec_order(OrderCommand::Override {
                status,
                reason: reason.clone(),
                by: auth.actor(),
                occurred_at: at,
            })?;
            s.reconcile()?;
            let order = self.commit(s)?.order;
            warn!(order_id = %order_id, status = %status, reason, actor = %auth.actor(), "order status overridden");
            Ok(order)
        });
        logged("override_order_status", result)
    }

    pub fn clear_order_override(&self, order_id: OrderId, auth: &AuthContext) -> Result<Order, SyncError> {
        let result = self.locks.with_lock(LockKey::Order(order_id), || -> Result<Order, SyncError> {
            auth.require(&Permission::ORDERS_OVERRIDE)?;
            let mut s = self.session(order_id, auth)?;
            let at = s.at();
            s.exec_order(OrderCommand::ClearOverride { occurred_at: at })?;
            s.reconcile()?;
            let order = self.commit(s)?.order;
            warn!(order_id = %order_id, actor = %auth.actor(), "order status override cleared");
            Ok(order)
        });
        logged("clear_order_override", result)
    }

    pub fn add_order_note(&self, order_id: OrderId, text: String, auth: &AuthContext) -> Result<Order, SyncError> {
        let result = self.locks.with_lock(LockKey::Order(order_id), || -> Result<Order, SyncError> {
            auth.require(&Permission::ORDERS_NOTES_WRITE)?;
            let mut s = self.session(order_id, auth)?;
            let at = s.at();
            s.exec_order(OrderCommand::AddNote {
                text,
                author: auth.actor(),
                occurred_at: at,
            })?;
            Ok(self.commit(s)?.order)
        });
        logged("add_order_note", result)
    }

    /// Read-only recomputation of the order status from its current jobs.
    pub fn get_aggregate_order_status(&self, order_id: OrderId) -> Result<OrderStatus, SyncError> {
        let order = self.load_order(order_id)?;
        let jobs = self.store.jobs_for_order(order_id)?;
        Ok(order.derive(&job_states(&jobs)).status)
    }

    pub fn get_order(&self, order_id: OrderId, auth: &AuthContext) -> Result<OrderView, SyncError> {
        let order = self.load_order(order_id)?;
        authorize_read(auth, &order)?;
        let jobs = self.store.jobs_for_order(order_id)?;
        Ok(view(order, jobs))
    }

    /// Status updates of the order and its jobs, oldest first.
    pub fn order_timeline(&self, order_id: OrderId, auth: &AuthContext) -> Result<Vec<StatusUpdate>, SyncError> {
        let order = self.load_order(order_id)?;
        authorize_read(auth, &order)?;
        Ok(self.store.updates_for_order(order_id)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Print jobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a job through its lifecycle and re-derive the parent order.
    ///
    /// Terminal states release the job's printer in the same change set.
    pub fn apply_job_status_change(
        &self,
        job_id: PrintJobId,
        to: JobStatus,
        progress: Option<u8>,
        failure_reason: Option<String>,
        auth: &AuthContext,
    ) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::JOBS_STATUS_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let current = s.job(job_id)?.status();
                if current == JobStatus::Pending
                    && to == JobStatus::Preparing
                    && s.order().payment_status() != PaymentStatus::Confirmed
                {
                    return Err(SyncError::InvalidTransition {
                        subject: "print job",
                        from: current.to_string(),
                        to: format!("{to} (payment {})", s.order().payment_status()),
                    });
                }

                let at = s.at();
                s.exec_job(
                    job_id,
                    PrintJobCommand::ChangeStatus(ChangeJobStatus {
                        to,
                        progress,
                        failure_reason,
                        occurred_at: at,
                    }),
                )?;
                if s.job(job_id)?.status().is_terminal() {
                    s.release_printer_of(job_id)?;
                }
                s.reconcile()?;
                job_from(self.commit(s)?, job_id)
            })
        })();
        logged("apply_job_status_change", result)
    }

    /// Progress update for a printing job; regressions are rejected.
    pub fn report_progress(&self, job_id: PrintJobId, progress: u8, auth: &AuthContext) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::JOBS_STATUS_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let at = s.at();
                s.exec_job(
                    job_id,
                    PrintJobCommand::ReportProgress(ReportProgress {
                        progress,
                        occurred_at: at,
                    }),
                )?;
                s.reconcile()?;
                job_from(self.commit(s)?, job_id)
            })
        })();
        logged("report_progress", result)
    }

    pub fn get_job(&self, job_id: PrintJobId, auth: &AuthContext) -> Result<PrintJob, SyncError> {
        let job = self.load_job(job_id)?;
        if let Some(order_id) = job.order_id() {
            authorize_read(auth, &self.load_order(order_id)?)?;
        } else {
            auth.require(&Permission::QUEUE_READ)?;
        }
        Ok(job)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a job for one on-demand item that has none in flight.
    pub fn add_item_to_queue(
        &self,
        order_id: OrderId,
        item_id: OrderItemId,
        auth: &AuthContext,
    ) -> Result<PrintJob, SyncError> {
        let result = self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
            auth.require(&Permission::QUEUE_WRITE)?;
            let mut s = self.session(order_id, auth)?;
            ensure_queueable(s.order())?;
            if blocking_job(&s, item_id).is_some() {
                return Err(SyncError::Conflict(format!(
                    "item {item_id} already has a print job"
                )));
            }
            let job_id = queue_item(&mut s, item_id)?;
            s.reconcile()?;
            job_from(self.commit(s)?, job_id)
        });
        logged("add_item_to_queue", result)
    }

    /// Queue every on-demand item lacking a job, then give each unassigned
    /// active job a printer (paid orders only), most urgent first.
    pub fn add_all_items_to_queue(&self, order_id: OrderId, auth: &AuthContext) -> Result<QueueSummary, SyncError> {
        let result = (|| -> Result<QueueSummary, SyncError> {
            auth.require(&Permission::QUEUE_WRITE)?;
            let known: Vec<PrinterId> = self
                .store
                .list_printers()?
                .iter()
                .map(|p| p.id_typed())
                .collect();

            let mut keys = vec![LockKey::Order(order_id)];
            keys.extend(known.iter().copied().map(LockKey::Printer));

            self.locks.with_locks(keys, || -> Result<QueueSummary, SyncError> {
                let mut s = self.session(order_id, auth)?;
                ensure_queueable(s.order())?;
                let mut summary = QueueSummary::default();

                let item_ids: Vec<OrderItemId> = s.order().on_demand_items().map(|i| i.id).collect();
                for item_id in item_ids {
                    if blocking_job(&s, item_id).is_none() {
                        summary.created.push(queue_item(&mut s, item_id)?);
                    }
                }

                let mut waiting: Vec<PrintJob> = s
                    .jobs()
                    .filter(|j| j.is_active() && j.printer_id().is_none())
                    .cloned()
                    .collect();
                waiting.sort_by(crate::store::queue_order);

                if s.order().payment_status() == PaymentStatus::Confirmed {
                    // Only printers whose lock we hold.
                    let printers = self
                        .store
                        .list_printers()?
                        .into_iter()
                        .filter(|p| known.contains(&p.id_typed()));
                    s.track_printers(printers);
                    for job in &waiting {
                        match s.assign_best_printer(job.id_typed())? {
                            Some(printer_id) => summary.assigned.push(Assignment {
                                job_id: job.id_typed(),
                                printer_id,
                            }),
                            None => summary.unassigned.push(job.id_typed()),
                        }
                    }
                } else {
                    summary.unassigned = waiting.iter().map(PrintJob::id_typed).collect();
                }

                s.reconcile()?;
                self.commit(s)?;
                info!(
                    order_id = %order_id,
                    created = summary.created.len(),
                    assigned = summary.assigned.len(),
                    unassigned = summary.unassigned.len(),
                    "order queued"
                );
                Ok(summary)
            })
        })();
        logged("add_all_items_to_queue", result)
    }

    pub fn update_priority(&self, job_id: PrintJobId, priority: u8, auth: &AuthContext) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::QUEUE_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let at = s.at();
                s.exec_job(
                    job_id,
                    PrintJobCommand::SetPriority(SetJobPriority {
                        priority,
                        occurred_at: at,
                    }),
                )?;
                job_from(self.commit(s)?, job_id)
            })
        })();
        logged("update_priority", result)
    }

    /// Plan when a job should start; only before printing has begun.
    pub fn schedule_job(
        &self,
        job_id: PrintJobId,
        start: DateTime<Utc>,
        auth: &AuthContext,
    ) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::QUEUE_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let at = s.at();
                s.exec_job(
                    job_id,
                    PrintJobCommand::Schedule(ScheduleJob {
                        start,
                        occurred_at: at,
                    }),
                )?;
                job_from(self.commit(s)?, job_id)
            })
        })();
        logged("schedule_job", result)
    }

    /// Filament consumed by a job, in grams, as reported by the print floor.
    pub fn record_material_used(
        &self,
        job_id: PrintJobId,
        grams: f64,
        auth: &AuthContext,
    ) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::JOBS_STATUS_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let at = s.at();
                s.exec_job(
                    job_id,
                    PrintJobCommand::RecordMaterial(RecordMaterialUsed {
                        grams,
                        occurred_at: at,
                    }),
                )?;
                job_from(self.commit(s)?, job_id)
            })
        })();
        logged("record_material_used", result)
    }

    /// Retry a failed job: a fresh pending job for the same item replaces it.
    pub fn requeue_failed_job(&self, job_id: PrintJobId, auth: &AuthContext) -> Result<PrintJob, SyncError> {
        let result = (|| -> Result<PrintJob, SyncError> {
            auth.require(&Permission::QUEUE_WRITE)?;
            let order_id = self.order_of_job(job_id)?;
            self.locks.with_lock(LockKey::Order(order_id), || -> Result<PrintJob, SyncError> {
                let mut s = self.session(order_id, auth)?;
                let failed = s.job(job_id)?;
                if failed.status() != JobStatus::Failed || failed.is_superseded() {
                    return Err(SyncError::InvalidTransition {
                        subject: "print job",
                        from: failed.status().to_string(),
                        to: "requeued".to_string(),
                    });
                }
                let item_id = failed
                    .order_item_id()
                    .ok_or(SyncError::MissingRequiredField("order_item_id"))?;
                ensure_queueable(s.order())?;

                let new_id = queue_item(&mut s, item_id)?;
                s.reconcile()?;
                let job = job_from(self.commit(s)?, new_id)?;
                info!(failed_job = %job_id, job_id = %new_id, "failed job requeued");
                Ok(job)
            })
        })();
        logged("requeue_failed_job", result)
    }

    pub fn list_queue(&self, filter: &JobFilter, auth: &AuthContext) -> Result<Vec<PrintJob>, SyncError> {
        auth.require(&Permission::QUEUE_READ)?;
        Ok(self.store.list_jobs(filter)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn session(&self, order_id: OrderId, auth: &AuthContext) -> Result<OrderSession<'_>, SyncError> {
        OrderSession::load(self.store.as_ref(), order_id, auth.actor(), Utc::now())
    }

    fn load_order(&self, order_id: OrderId) -> Result<Order, SyncError> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| SyncError::not_found(format!("order {order_id}")))
    }

    fn load_job(&self, job_id: PrintJobId) -> Result<PrintJob, SyncError> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| SyncError::not_found(format!("print job {job_id}")))
    }

    fn order_of_job(&self, job_id: PrintJobId) -> Result<OrderId, SyncError> {
        self.load_job(job_id)?
            .order_id()
            .ok_or_else(|| SyncError::not_found(format!("order of print job {job_id}")))
    }

    fn generate_order_number(&self, at: DateTime<Utc>) -> Result<String, SyncError> {
        let mut rng = rand::thread_rng();
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
                .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
                .collect();
            let number = format_order_number(at, &suffix);
            if !self.store.order_number_exists(&number)? {
                return Ok(number);
            }
        }
        Err(SyncError::Conflict("could not allocate a unique order number".to_string()))
    }

    /// Commit a session's net changes, then log and publish them.
    fn commit(&self, session: OrderSession<'_>) -> Result<Outcome, SyncError> {
        let outcome = session.finish();
        if outcome.changes.is_empty() {
            debug!(order_id = %outcome.order.id_typed(), "no-op; nothing to commit");
            return Ok(outcome);
        }

        self.store.commit(outcome.changes.clone())?;

        for update in &outcome.changes.updates {
            info!(
                subject = update.subject.kind(),
                id = %update.subject.id(),
                order_id = %update.order_id,
                from = update.old_status.as_str(),
                to = update.new_status.as_str(),
                actor = %update.actor,
                "status updated"
            );
        }
        for event in &outcome.events {
            if let Err(e) = self.bus.publish(event.clone()) {
                warn!(error = ?e, "failed to publish sync event");
            }
        }
        Ok(outcome)
    }
}

/// Apply the order's facts to its jobs, then re-derive the order.
///
/// - cancelled (or payment refunded/cancelled): every active job is cancelled,
///   noted and its printer released;
/// - payment confirmed: pending jobs move to preparing.
fn settle(s: &mut OrderSession<'_>) -> Result<(), SyncError> {
    let order = s.order();
    let payment = order.payment_status();
    let cancel_note = if order.is_cancelled() {
        Some(match order.cancel_reason() {
            Some(reason) => format!("Cancelled with order {}: {reason}", order.number()),
            None => format!("Cancelled with order {}", order.number()),
        })
    } else if matches!(payment, PaymentStatus::Refunded | PaymentStatus::Cancelled) {
        Some(format!("Cancelled: payment {payment} on order {}", order.number()))
    } else {
        None
    };

    let active: Vec<(PrintJobId, JobStatus)> = s
        .jobs()
        .filter(|j| j.is_active())
        .map(|j| (j.id_typed(), j.status()))
        .collect();
    let at = s.at();

    for (job_id, status) in active {
        if let Some(note) = &cancel_note {
            s.exec_job(
                job_id,
                PrintJobCommand::ChangeStatus(ChangeJobStatus {
                    to: JobStatus::Cancelled,
                    progress: None,
                    failure_reason: None,
                    occurred_at: at,
                }),
            )?;
            s.exec_job(
                job_id,
                PrintJobCommand::AddNote(AddJobNote {
                    text: note.clone(),
                    occurred_at: at,
                }),
            )?;
            s.release_printer_of(job_id)?;
        } else if payment == PaymentStatus::Confirmed && status == JobStatus::Pending {
            s.exec_job(
                job_id,
                PrintJobCommand::ChangeStatus(ChangeJobStatus {
                    to: JobStatus::Preparing,
                    progress: None,
                    failure_reason: None,
                    occurred_at: at,
                }),
            )?;
        }
    }

    s.reconcile()
}

/// Create a job for `item_id` inside the session.
///
/// Paid orders start the job at `preparing`. A failed, not yet superseded
/// job of the same item is superseded by the new one.
fn queue_item(s: &mut OrderSession<'_>, item_id: OrderItemId) -> Result<PrintJobId, SyncError> {
    let order = s.order();
    let item = order
        .item(item_id)
        .ok_or_else(|| SyncError::not_found(format!("order item {item_id}")))?;
    let spec = item
        .on_demand
        .as_ref()
        .ok_or_else(|| SyncError::Validation(format!("item {item_id} is not printed on demand")))?;
    let customer_id = order
        .customer_id()
        .ok_or(SyncError::MissingRequiredField("customer_id"))?;

    let at = s.at();
    let job_id = PrintJobId::new();
    let mut job = PrintJob::empty(job_id);
    execute(
        &mut job,
        &PrintJobCommand::Create(CreatePrintJob {
            job_id,
            order_id: order.id_typed(),
            order_item_id: item_id,
            customer_id,
            settings: spec.settings.clone(),
            model_dimensions: spec.model.as_ref().and_then(|m| m.dimensions),
            priority: spec.priority,
            occurred_at: at,
        }),
    )?;
    let paid = order.payment_status() == PaymentStatus::Confirmed;

    let replaced: Vec<PrintJobId> = s
        .jobs()
        .filter(|j| j.order_item_id() == Some(item_id))
        .filter(|j| j.status() == JobStatus::Failed && !j.is_superseded())
        .map(PrintJob::id_typed)
        .collect();

    s.insert_job(job);
    if paid {
        s.exec_job(
            job_id,
            PrintJobCommand::ChangeStatus(ChangeJobStatus {
                to: JobStatus::Preparing,
                progress: None,
                failure_reason: None,
                occurred_at: at,
            }),
        )?;
    }
    for old in replaced {
        s.exec_job(
            old,
            PrintJobCommand::MarkSuperseded(MarkSuperseded {
                by: job_id,
                occurred_at: at,
            }),
        )?;
        s.exec_job(
            old,
            PrintJobCommand::AddNote(AddJobNote {
                text: format!("Superseded by retry job {job_id}"),
                occurred_at: at,
            }),
        )?;
    }
    Ok(job_id)
}

/// A job that keeps `item_id` from being queued again (active or completed).
fn blocking_job(s: &OrderSession<'_>, item_id: OrderItemId) -> Option<PrintJobId> {
    s.jobs()
        .filter(|j| j.order_item_id() == Some(item_id) && !j.is_superseded())
        .find(|j| j.is_active() || j.status() == JobStatus::Completed)
        .map(PrintJob::id_typed)
}

fn ensure_queueable(order: &Order) -> Result<(), SyncError> {
    if order.is_cancelled() || order.status().is_terminal() {
        return Err(SyncError::InvalidTransition {
            subject: "order",
            from: order.status().to_string(),
            to: "queued".to_string(),
        });
    }
    Ok(())
}

/// Owners may cancel their own order while it is still unpaid; every other
/// request needs the status permission.
fn authorize_status_request(auth: &AuthContext, order: &Order, to: OrderStatus) -> Result<(), SyncError> {
    if auth.has(&Permission::ORDERS_STATUS_WRITE) {
        return Ok(());
    }
    let is_owner = order.customer_id().is_some() && auth.user_id() == order.customer_id();
    if is_owner && to == OrderStatus::Cancelled && order.status() == OrderStatus::Pending {
        return Ok(());
    }
    Err(SyncError::Forbidden(format!(
        "missing permission '{}'",
        Permission::ORDERS_STATUS_WRITE
    )))
}

fn authorize_read(auth: &AuthContext, order: &Order) -> Result<(), SyncError> {
    match order.customer_id() {
        Some(owner) => auth.require_owner_or(owner, &Permission::ORDERS_READ_ANY)?,
        None => auth.require(&Permission::ORDERS_READ_ANY)?,
    }
    Ok(())
}

fn job_states(jobs: &[PrintJob]) -> Vec<printforge_orders::JobState> {
    jobs.iter()
        .filter(|j| !j.is_superseded())
        .map(|j| printforge_orders::JobState {
            status: j.status(),
            started_printing: j.started_at().is_some(),
        })
        .collect()
}

fn view(order: Order, jobs: Vec<PrintJob>) -> OrderView {
    let aggregate_status = order.derive(&job_states(&jobs)).status;
    OrderView {
        order,
        jobs,
        aggregate_status,
    }
}

fn job_from(outcome: Outcome, job_id: PrintJobId) -> Result<PrintJob, SyncError> {
    outcome
        .jobs
        .into_iter()
        .find(|j| j.id_typed() == job_id)
        .ok_or_else(|| SyncError::not_found(format!("print job {job_id}")))
}

fn logged<T>(operation: &'static str, result: Result<T, SyncError>) -> Result<T, SyncError> {
    if let Err(e) = &result {
        if e.is_rejection() {
            warn!(operation, error = %e, "request rejected");
        } else {
            error!(operation, error = %e, "operation failed");
        }
    }
    result
}
