//! Unit of work for one order and everything hanging off it.
//!
//! A session loads an order with all of its jobs, runs commands against the
//! in-memory aggregates, and turns the net result into one [`ChangeSet`]:
//! one snapshot per changed entity (guarded by the version it was loaded
//! at) and one [`StatusUpdate`] per entity whose status differs from the
//! loaded one. Intermediate states inside a single operation are not audited.

use chrono::{DateTime, Utc};

use printforge_core::{Actor, AggregateRoot, ExpectedVersion, OrderId, PrintJobId, PrinterId};
use printforge_events::execute;
use printforge_orders::{JobState, Order, OrderCommand, OrderEvent, OrderStatus};
use printforge_printing::{
    AssignJobPrinter, JobStatus, PrintJob, PrintJobCommand, PrintJobEvent, Printer,
};

use super::error::SyncError;
use super::events::SyncEvent;
use crate::audit::{StatusUpdate, Subject};
use crate::registry::pick_printer;
use crate::store::{ChangeSet, SyncStore};

#[derive(Debug, Clone, Copy)]
struct JobBaseline {
    version: u64,
    status: JobStatus,
    progress: u8,
}

#[derive(Debug)]
struct TrackedJob {
    job: PrintJob,
    /// `None` for jobs created in this session.
    baseline: Option<JobBaseline>,
}

#[derive(Debug)]
struct TrackedPrinter {
    printer: Printer,
    loaded_version: u64,
}

/// What a finished session hands to the engine.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub changes: ChangeSet,
    pub events: Vec<SyncEvent>,
    pub order: Order,
    pub jobs: Vec<PrintJob>,
}

pub(crate) struct OrderSession<'s> {
    store: &'s dyn SyncStore,
    actor: Actor,
    at: DateTime<Utc>,
    order: Order,
    order_baseline: Option<(u64, OrderStatus)>,
    jobs: Vec<TrackedJob>,
    printers: Vec<TrackedPrinter>,
    /// Subjects in the order their status first moved.
    touched: Vec<Subject>,
}

impl<'s> OrderSession<'s> {
    pub fn load(
        store: &'s dyn SyncStore,
        order_id: OrderId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let order = store
            .get_order(order_id)?
            .ok_or_else(|| SyncError::not_found(format!("order {order_id}")))?;
        let jobs = store
            .jobs_for_order(order_id)?
            .into_iter()
            .map(|job| TrackedJob {
                baseline: Some(JobBaseline {
                    version: job.version(),
                    status: job.status(),
                    progress: job.progress(),
                }),
                job,
            })
            .collect();

        Ok(Self {
            store,
            actor,
            at,
            order_baseline: Some((order.version(), order.status())),
            order,
            jobs,
            printers: Vec::new(),
            touched: Vec::new(),
        })
    }

    /// Session for an order that does not exist in the store yet.
    pub fn placed(store: &'s dyn SyncStore, order: Order, actor: Actor, at: DateTime<Utc>) -> Self {
        Self {
            store,
            actor,
            at,
            order,
            order_baseline: None,
            jobs: Vec::new(),
            printers: Vec::new(),
            touched: Vec::new(),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn jobs(&self) -> impl Iterator<Item = &PrintJob> {
        self.jobs.iter().map(|t| &t.job)
    }

    pub fn job(&self, id: PrintJobId) -> Result<&PrintJob, SyncError> {
        self.jobs
            .iter()
            .map(|t| &t.job)
            .find(|j| j.id_typed() == id)
            .ok_or_else(|| SyncError::not_found(format!("print job {id}")))
    }

    pub fn exec_order(&mut self, command: OrderCommand) -> Result<Vec<OrderEvent>, SyncError> {
        let events = execute(&mut self.order, &command)?;
        let moved = self
            .order_baseline
            .is_some_and(|(_, before)| before != self.order.status());
        if moved {
            self.touch(Subject::Order(self.order.id_typed()));
        }
        Ok(events)
    }

    pub fn exec_job(
        &mut self,
        id: PrintJobId,
        command: PrintJobCommand,
    ) -> Result<Vec<PrintJobEvent>, SyncError> {
        let tracked = self
            .jobs
            .iter_mut()
            .find(|t| t.job.id_typed() == id)
            .ok_or_else(|| SyncError::not_found(format!("print job {id}")))?;
        let events = execute(&mut tracked.job, &command)?;
        let moved = tracked
            .baseline
            .is_some_and(|b| b.status != tracked.job.status());
        if moved {
            self.touch(Subject::PrintJob(id));
        }
        Ok(events)
    }

    pub fn insert_job(&mut self, job: PrintJob) {
        self.jobs.push(TrackedJob {
            job,
            baseline: None,
        });
    }

    fn touch(&mut self, subject: Subject) {
        if !self.touched.contains(&subject) {
            self.touched.push(subject);
        }
    }

    /// Make `printers` available to [`OrderSession::assign_best_printer`].
    pub fn track_printers(&mut self, printers: impl IntoIterator<Item = Printer>) {
        for printer in printers {
            if self.printer_index(printer.id_typed()).is_none() {
                self.printers.push(TrackedPrinter {
                    loaded_version: printer.version(),
                    printer,
                });
            }
        }
    }

    fn printer_index(&self, id: PrinterId) -> Option<usize> {
        self.printers.iter().position(|t| t.printer.id_typed() == id)
    }

    /// Free whatever printer `job_id` holds. Missing printers are ignored.
    pub fn release_printer_of(&mut self, job_id: PrintJobId) -> Result<(), SyncError> {
        let Some(printer_id) = self.job(job_id)?.printer_id() else {
            return Ok(());
        };
        let idx = match self.printer_index(printer_id) {
            Some(idx) => idx,
            None => match self.store.get_printer(printer_id)? {
                Some(printer) => {
                    self.track_printers([printer]);
                    self.printers.len() - 1
                }
                None => {
                    tracing::warn!(job_id = %job_id, printer_id = %printer_id, "job references a missing printer");
                    return Ok(());
                }
            },
        };
        self.printers[idx].printer.release(job_id, self.at);
        Ok(())
    }

    /// Put `job_id` on the best tracked printer. Returns the printer, if any fit.
    pub fn assign_best_printer(&mut self, job_id: PrintJobId) -> Result<Option<PrinterId>, SyncError> {
        let job = self.job(job_id)?;
        let Some(printer_id) = pick_printer(self.printers.iter().map(|t| &t.printer), job) else {
            return Ok(None);
        };
        if let Some(idx) = self.printer_index(printer_id) {
            self.printers[idx].printer.assign(job_id);
        }
        let at = self.at;
        self.exec_job(
            job_id,
            PrintJobCommand::AssignPrinter(AssignJobPrinter {
                printer_id,
                occurred_at: at,
            }),
        )?;
        Ok(Some(printer_id))
    }

    /// Job states that feed the aggregate derivation (superseded jobs excluded).
    pub fn job_states(&self) -> Vec<JobState> {
        self.jobs
            .iter()
            .filter(|t| !t.job.is_superseded())
            .map(|t| JobState {
                status: t.job.status(),
                started_printing: t.job.started_at().is_some(),
            })
            .collect()
    }

    /// Re-derive the order status from the current job states.
    pub fn reconcile(&mut self) -> Result<(), SyncError> {
        let jobs = self.job_states();
        let at = self.at;
        self.exec_order(OrderCommand::Reconcile {
            jobs,
            occurred_at: at,
        })?;
        Ok(())
    }

    pub fn finish(self) -> Outcome {
        let mut changes = ChangeSet::new();
        let mut events = Vec::new();
        let order_id = self.order.id_typed();
        let customer_id = self.order.customer_id();

        match self.order_baseline {
            None => changes.put_order(ExpectedVersion::New, self.order.clone()),
            Some((version, _)) if version != self.order.version() => {
                changes.put_order(ExpectedVersion::Exact(version), self.order.clone())
            }
            Some(_) => {}
        }

        for tracked in &self.jobs {
            match tracked.baseline {
                None => changes.put_job(ExpectedVersion::New, tracked.job.clone()),
                Some(b) if b.version != tracked.job.version() => {
                    changes.put_job(ExpectedVersion::Exact(b.version), tracked.job.clone())
                }
                Some(_) => {}
            }
        }

        for tracked in &self.printers {
            if tracked.printer.version() != tracked.loaded_version {
                changes.put_printer(
                    ExpectedVersion::Exact(tracked.loaded_version),
                    tracked.printer.clone(),
                );
            }
        }

        for subject in &self.touched {
            let (before, after, failure_reason) = match subject {
                Subject::Order(_) => match self.order_baseline {
                    Some((_, before)) if before != self.order.status() => {
                        (before.to_string(), self.order.status().to_string(), None)
                    }
                    _ => continue,
                },
                Subject::PrintJob(id) => {
                    let Some(tracked) = self.jobs.iter().find(|t| t.job.id_typed() == *id) else {
                        continue;
                    };
                    match tracked.baseline {
                        Some(b) if b.status != tracked.job.status() => (
                            b.status.to_string(),
                            tracked.job.status().to_string(),
                            tracked.job.failure_reason().map(str::to_string),
                        ),
                        _ => continue,
                    }
                }
            };

            let update = StatusUpdate::new(*subject, order_id, before, after, self.actor, self.at);
            changes.record(update.clone());
            events.push(SyncEvent::StatusChanged {
                update,
                customer_id,
                failure_reason,
                cancel_reason: self.order.cancel_reason().map(str::to_string),
            });
        }

        for tracked in &self.jobs {
            let Some(b) = tracked.baseline else { continue };
            let job = &tracked.job;
            if job.status() == JobStatus::Printing && job.progress() != b.progress {
                events.push(SyncEvent::ProgressReported {
                    job_id: job.id_typed(),
                    order_id,
                    customer_id,
                    progress: job.progress(),
                    occurred_at: self.at,
                });
            }
        }

        Outcome {
            changes,
            events,
            order: self.order,
            jobs: self.jobs.into_iter().map(|t| t.job).collect(),
        }
    }
}
