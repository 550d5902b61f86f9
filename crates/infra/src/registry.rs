//! Printer registry: capability, availability and current-job bookkeeping.
//!
//! Assignment is serialized per printer (and per owning order, since it also
//! mutates the job). Releasing on terminal job states happens inside the sync
//! engine's own change sets; the release here is the idempotent manual path.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use printforge_auth::{AuthContext, AuthzError, Permission};
use printforge_core::{AggregateRoot, DomainError, ExpectedVersion, PrintJobId, PrinterId};
use printforge_events::execute;
use printforge_printing::{
    AssignJobPrinter, Incompatibility, Material, NewPrinter, PrintJob, PrintJobCommand, Printer,
    PrinterStatus,
};

use crate::locks::{KeyedLocks, LockKey};
use crate::store::{ChangeSet, StoreError, SyncStore};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssignmentError {
    #[error("printer {printer} is busy with job {current_job}")]
    PrinterBusy {
        printer: PrinterId,
        current_job: PrintJobId,
    },

    #[error("printer {printer} does not support {material}")]
    IncompatibleMaterial {
        printer: PrinterId,
        material: Material,
    },

    #[error("printer {printer} is {status}")]
    PrinterUnavailable {
        printer: PrinterId,
        status: PrinterStatus,
    },

    #[error("printer {0} is retired")]
    PrinterRetired(PrinterId),

    #[error("model does not fit the build volume of printer {0}")]
    ExceedsBuildVolume(PrinterId),

    #[error("job cannot be assigned: {0}")]
    JobNotAssignable(String),

    #[error("printers enter 'printing' by taking a job")]
    InvalidStatus,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl AssignmentError {
    fn from_incompatibility(printer: PrinterId, value: Incompatibility) -> Self {
        match value {
            Incompatibility::Busy { current_job } => AssignmentError::PrinterBusy {
                printer,
                current_job,
            },
            Incompatibility::Unavailable { status } => {
                AssignmentError::PrinterUnavailable { printer, status }
            }
            Incompatibility::Retired => AssignmentError::PrinterRetired(printer),
            Incompatibility::Material { required } => AssignmentError::IncompatibleMaterial {
                printer,
                material: required,
            },
            Incompatibility::BuildVolume => AssignmentError::ExceedsBuildVolume(printer),
        }
    }
}

impl From<StoreError> for AssignmentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => AssignmentError::NotFound(what),
            StoreError::Conflict(msg) => AssignmentError::Conflict(msg),
            StoreError::Backend(msg) => AssignmentError::Persistence(msg),
        }
    }
}

impl From<AuthzError> for AssignmentError {
    fn from(value: AuthzError) -> Self {
        AssignmentError::Forbidden(value.to_string())
    }
}

impl From<DomainError> for AssignmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound => AssignmentError::NotFound("resource".to_string()),
            DomainError::Conflict(msg) => AssignmentError::Conflict(msg),
            DomainError::InvariantViolation(msg) => AssignmentError::JobNotAssignable(msg),
            other => AssignmentError::Validation(other.to_string()),
        }
    }
}

/// Counts per printer status. Retired printers are counted only in `retired`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterStatistics {
    pub total: usize,
    pub idle: usize,
    pub printing: usize,
    pub maintenance: usize,
    pub offline: usize,
    pub retired: usize,
    /// Share of in-service printers currently printing (0.0 ..= 1.0).
    pub utilization: f64,
}

impl PrinterStatistics {
    pub fn from_printers<'a>(printers: impl IntoIterator<Item = &'a Printer>) -> Self {
        let mut stats = PrinterStatistics::default();
        for p in printers {
            stats.total += 1;
            if p.is_retired() {
                stats.retired += 1;
                continue;
            }
            match p.status() {
                PrinterStatus::Idle => stats.idle += 1,
                PrinterStatus::Printing => stats.printing += 1,
                PrinterStatus::Maintenance => stats.maintenance += 1,
                PrinterStatus::Offline => stats.offline += 1,
            }
        }
        let in_service = stats.total - stats.retired;
        if in_service > 0 {
            stats.utilization = stats.printing as f64 / in_service as f64;
        }
        stats
    }
}

/// Auto-assignment policy: among available printers able to take `job`,
/// the one idle the longest, ties broken by lowest id.
pub fn pick_printer<'a>(
    printers: impl IntoIterator<Item = &'a Printer>,
    job: &PrintJob,
) -> Option<PrinterId> {
    let material = job.required_material();
    let part = job.required_volume();
    printers
        .into_iter()
        .filter(|p| p.is_available())
        .filter(|p| p.check_assignable(job.id_typed(), material, part).is_ok())
        .min_by_key(|p| (p.idle_since(), p.id_typed()))
        .map(Printer::id_typed)
}

#[derive(Clone)]
pub struct PrinterRegistry {
    store: Arc<dyn SyncStore>,
    locks: Arc<KeyedLocks<LockKey>>,
}

impl PrinterRegistry {
    pub fn new(store: Arc<dyn SyncStore>, locks: Arc<KeyedLocks<LockKey>>) -> Self {
        Self { store, locks }
    }

    pub fn register_printer(
        &self,
        input: NewPrinter,
        auth: &AuthContext,
    ) -> Result<Printer, AssignmentError> {
        auth.require(&Permission::PRINTERS_WRITE)?;
        let printer = Printer::register(PrinterId::new(), input, Utc::now())?;

        let mut changes = ChangeSet::new();
        changes.put_printer(ExpectedVersion::New, printer.clone());
        self.store.commit(changes)?;

        info!(printer_id = %printer.id_typed(), name = printer.name(), "printer registered");
        Ok(printer)
    }

    pub fn get_printer(&self, id: PrinterId, auth: &AuthContext) -> Result<Printer, AssignmentError> {
        auth.require(&Permission::PRINTERS_READ)?;
        self.load_printer(id)
    }

    pub fn list_printers(&self, auth: &AuthContext) -> Result<Vec<Printer>, AssignmentError> {
        auth.require(&Permission::PRINTERS_READ)?;
        Ok(self.store.list_printers()?)
    }

    /// Operator status change (idle, maintenance, offline).
    pub fn set_printer_status(
        &self,
        id: PrinterId,
        status: PrinterStatus,
        auth: &AuthContext,
    ) -> Result<Printer, AssignmentError> {
        auth.require(&Permission::PRINTERS_WRITE)?;
        if status == PrinterStatus::Printing {
            return Err(AssignmentError::InvalidStatus);
        }

        self.locks.with_lock(LockKey::Printer(id), || {
            let mut printer = self.load_printer(id)?;
            let loaded = printer.version();
            let changed = printer
                .set_status(status, Utc::now())
                .map_err(|e| AssignmentError::from_incompatibility(id, e))?;
            if changed {
                let mut changes = ChangeSet::new();
                changes.put_printer(ExpectedVersion::Exact(loaded), printer.clone());
                self.store.commit(changes)?;
                info!(printer_id = %id, status = %status, "printer status changed");
            }
            Ok(printer)
        })
    }

    pub fn retire_printer(&self, id: PrinterId, auth: &AuthContext) -> Result<Printer, AssignmentError> {
        auth.require(&Permission::PRINTERS_WRITE)?;

        self.locks.with_lock(LockKey::Printer(id), || {
            let mut printer = self.load_printer(id)?;
            let loaded = printer.version();
            let changed = printer
                .retire(Utc::now())
                .map_err(|e| AssignmentError::from_incompatibility(id, e))?;
            if changed {
                let mut changes = ChangeSet::new();
                changes.put_printer(ExpectedVersion::Exact(loaded), printer.clone());
                self.store.commit(changes)?;
                info!(printer_id = %id, "printer retired");
            }
            Ok(printer)
        })
    }

    /// Put `job` on `printer`. Re-assigning a job moves it off its old printer.
    pub fn assign_printer(
        &self,
        job_id: PrintJobId,
        printer_id: PrinterId,
        auth: &AuthContext,
    ) -> Result<PrintJob, AssignmentError> {
        auth.require(&Permission::QUEUE_WRITE)?;

        let snapshot = self.load_job(job_id)?;
        let order_id = snapshot
            .order_id()
            .ok_or_else(|| AssignmentError::JobNotAssignable("job has no order".to_string()))?;
        let previous = snapshot.printer_id();

        let mut keys = vec![LockKey::Order(order_id), LockKey::Printer(printer_id)];
        keys.extend(previous.map(LockKey::Printer));

        let result = self.locks.with_locks(keys, || {
            let mut job = self.load_job(job_id)?;
            if job.printer_id() != previous {
                return Err(AssignmentError::Conflict(format!(
                    "job {job_id} was reassigned concurrently"
                )));
            }
            if !job.is_active() {
                return Err(AssignmentError::JobNotAssignable(format!(
                    "job {job_id} is {}",
                    job.status()
                )));
            }

            let mut printer = self.load_printer(printer_id)?;
            printer
                .check_assignable(job_id, job.required_material(), job.required_volume())
                .map_err(|e| AssignmentError::from_incompatibility(printer_id, e))?;

            let mut changes = ChangeSet::new();
            if let Some(old_id) = previous.filter(|old| *old != printer_id) {
                let mut old = self.load_printer(old_id)?;
                let loaded = old.version();
                if old.release(job_id, Utc::now()) {
                    changes.put_printer(ExpectedVersion::Exact(loaded), old);
                }
            }

            let printer_version = printer.version();
            printer.assign(job_id);
            if printer.version() != printer_version {
                changes.put_printer(ExpectedVersion::Exact(printer_version), printer);
            }

            let job_version = job.version();
            execute(
                &mut job,
                &PrintJobCommand::AssignPrinter(AssignJobPrinter {
                    printer_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            if job.version() != job_version {
                changes.put_job(ExpectedVersion::Exact(job_version), job.clone());
            }

            if !changes.is_empty() {
                self.store.commit(changes)?;
                info!(job_id = %job_id, printer_id = %printer_id, "printer assigned");
            }
            Ok(job)
        });

        if let Err(e) = &result {
            warn!(job_id = %job_id, printer_id = %printer_id, error = %e, "printer assignment rejected");
        }
        result
    }

    /// Assign `job` to the best available printer, if any.
    pub fn auto_assign(
        &self,
        job_id: PrintJobId,
        auth: &AuthContext,
    ) -> Result<Option<PrinterId>, AssignmentError> {
        auth.require(&Permission::QUEUE_WRITE)?;
        let job = self.load_job(job_id)?;
        let printers = self.store.list_printers()?;
        match pick_printer(&printers, &job) {
            Some(printer_id) => {
                self.assign_printer(job_id, printer_id, auth)?;
                Ok(Some(printer_id))
            }
            None => Ok(None),
        }
    }

    /// Free the printer held by a finished job. Returns whether anything changed.
    ///
    /// Idempotent. An active job keeps its printer until it reaches a terminal
    /// state or is reassigned, so releasing it is a no-op.
    pub fn release_printer(&self, job_id: PrintJobId, auth: &AuthContext) -> Result<bool, AssignmentError> {
        auth.require(&Permission::QUEUE_WRITE)?;

        let snapshot = self.load_job(job_id)?;
        let Some(printer_id) = snapshot.printer_id() else {
            return Ok(false);
        };
        if snapshot.is_active() {
            debug!(job_id = %job_id, status = %snapshot.status(), "release skipped, job still active");
            return Ok(false);
        }

        self.locks.with_lock(LockKey::Printer(printer_id), || {
            let mut printer = self.load_printer(printer_id)?;
            let loaded = printer.version();
            if !printer.release(job_id, Utc::now()) {
                return Ok(false);
            }
            let mut changes = ChangeSet::new();
            changes.put_printer(ExpectedVersion::Exact(loaded), printer);
            self.store.commit(changes)?;
            info!(job_id = %job_id, printer_id = %printer_id, "printer released");
            Ok(true)
        })
    }

    /// Printers able to print `job` at all (material and build volume),
    /// regardless of whether they are free right now.
    pub fn find_compatible_printers(
        &self,
        job_id: PrintJobId,
        auth: &AuthContext,
    ) -> Result<Vec<Printer>, AssignmentError> {
        auth.require(&Permission::PRINTERS_READ)?;
        let job = self.load_job(job_id)?;
        let material = job.required_material();
        let part = job.required_volume();
        Ok(self
            .store
            .list_printers()?
            .into_iter()
            .filter(|p| !p.is_retired() && p.check_capability(material, part).is_ok())
            .collect())
    }

    pub fn printer_statistics(&self, auth: &AuthContext) -> Result<PrinterStatistics, AssignmentError> {
        auth.require(&Permission::PRINTERS_READ)?;
        let printers = self.store.list_printers()?;
        Ok(PrinterStatistics::from_printers(&printers))
    }

    fn load_job(&self, id: PrintJobId) -> Result<PrintJob, AssignmentError> {
        self.store
            .get_job(id)?
            .ok_or_else(|| AssignmentError::NotFound(format!("print job {id}")))
    }

    fn load_printer(&self, id: PrinterId) -> Result<Printer, AssignmentError> {
        self.store
            .get_printer(id)?
            .ok_or_else(|| AssignmentError::NotFound(format!("printer {id}")))
    }
}
