//! Print floor domain module.
//!
//! Print jobs (event-sourced aggregate), printers (entities) and the value
//! objects that describe what a job needs from a printer. Deterministic domain
//! logic only: no IO, no HTTP, no storage.

pub mod job;
pub mod model;
pub mod printer;
pub mod settings;

pub use job::{
    AddJobNote, AssignJobPrinter, ChangeJobStatus, CreatePrintJob, JobCreated, JobNote,
    JobStatus, JobStatusChanged, MarkSuperseded, PrintJob, PrintJobCommand, PrintJobEvent,
    RecordMaterialUsed, ReportProgress, ScheduleJob, SetJobPriority, DEFAULT_PRIORITY,
};
pub use model::ModelValidationResult;
pub use printer::{BuildVolume, Incompatibility, NewPrinter, Printer, PrinterStatus};
pub use settings::{Material, PrintSettings};
