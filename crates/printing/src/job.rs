use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printforge_core::{
    Aggregate, AggregateRoot, DomainError, OrderId, OrderItemId, PrintJobId, PrinterId, UserId,
};
use printforge_events::Event;

use crate::printer::BuildVolume;
use crate::settings::{Material, PrintSettings};

/// Priority given to jobs created without an explicit one (1 = most urgent).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Print job lifecycle.
///
/// `pending → preparing → printing → post-processing → completed`, with
/// `failed`/`cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Preparing,
    Printing,
    PostProcessing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Preparing,
        JobStatus::Printing,
        JobStatus::PostProcessing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Preparing => "preparing",
            JobStatus::Printing => "printing",
            JobStatus::PostProcessing => "post-processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a job in this state has physically started printing.
    pub fn has_started_printing(&self) -> bool {
        matches!(
            self,
            JobStatus::Printing | JobStatus::PostProcessing | JobStatus::Completed
        )
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Completed | Failed | Cancelled, _) => false,
            (_, Failed | Cancelled) => true,
            (Pending, Preparing) => true,
            (Preparing, Printing) => true,
            (Printing, PostProcessing | Completed) => true,
            (PostProcessing, Completed) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown print job status '{s}'")))
    }
}

/// Free-text annotation on a job (operator notes, cascaded cancellation reasons).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNote {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Aggregate root: PrintJob.
///
/// One job per on-demand order line item (a retried item gets a fresh job and
/// the failed one is marked superseded).
///
/// # Invariants
/// - Progress never decreases while the job is `printing`.
/// - `completed` forces progress to 100; `failed`/`cancelled` freeze it.
/// - A `failed` job always carries a failure reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    id: PrintJobId,
    order_id: Option<OrderId>,
    order_item_id: Option<OrderItemId>,
    customer_id: Option<UserId>,
    status: JobStatus,
    progress: u8,
    priority: u8,
    settings: PrintSettings,
    model_dimensions: Option<BuildVolume>,
    printer_id: Option<PrinterId>,
    material_used_grams: Option<f64>,
    scheduled_start_time: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    notes: Vec<JobNote>,
    superseded_by: Option<PrintJobId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PrintJob {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PrintJobId) -> Self {
        Self {
            id,
            order_id: None,
            order_item_id: None,
            customer_id: None,
            status: JobStatus::Pending,
            progress: 0,
            priority: DEFAULT_PRIORITY,
            settings: PrintSettings::default(),
            model_dimensions: None,
            printer_id: None,
            material_used_grams: None,
            scheduled_start_time: None,
            started_at: None,
            completed_at: None,
            failure_reason: None,
            notes: Vec::new(),
            superseded_by: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrintJobId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn order_item_id(&self) -> Option<OrderItemId> {
        self.order_item_id
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn model_dimensions(&self) -> Option<BuildVolume> {
        self.model_dimensions
    }

    /// Printer that holds (or last held) this job.
    pub fn printer_id(&self) -> Option<PrinterId> {
        self.printer_id
    }

    pub fn material_used_grams(&self) -> Option<f64> {
        self.material_used_grams
    }

    pub fn scheduled_start_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_start_time
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn notes(&self) -> &[JobNote] {
        &self.notes
    }

    pub fn superseded_by(&self) -> Option<PrintJobId> {
        self.superseded_by
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Non-terminal and not replaced by a retry.
    pub fn is_active(&self) -> bool {
        self.created && !self.status.is_terminal() && self.superseded_by.is_none()
    }

    pub fn required_material(&self) -> Option<Material> {
        self.settings.material
    }

    /// Model dimensions after applying the scale setting.
    pub fn required_volume(&self) -> Option<BuildVolume> {
        self.model_dimensions
            .map(|d| d.scaled(self.settings.scale_factor()))
    }
}

impl AggregateRoot for PrintJob {
    type Id = PrintJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: CreatePrintJob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePrintJob {
    pub job_id: PrintJobId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub customer_id: UserId,
    pub settings: PrintSettings,
    pub model_dimensions: Option<BuildVolume>,
    pub priority: Option<u8>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeJobStatus.
///
/// `progress` is optional; it is only meaningful when the job is or becomes
/// `printing`. `failure_reason` is mandatory when `to` is `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeJobStatus {
    pub to: JobStatus,
    pub progress: Option<u8>,
    pub failure_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReportProgress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProgress {
    pub progress: u8,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignJobPrinter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignJobPrinter {
    pub printer_id: PrinterId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetJobPriority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetJobPriority {
    pub priority: u8,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddJobNote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddJobNote {
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSuperseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSuperseded {
    pub by: PrintJobId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ScheduleJob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleJob {
    pub start: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMaterialUsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMaterialUsed {
    pub grams: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrintJobCommand {
    Create(CreatePrintJob),
    ChangeStatus(ChangeJobStatus),
    ReportProgress(ReportProgress),
    AssignPrinter(AssignJobPrinter),
    SetPriority(SetJobPriority),
    AddNote(AddJobNote),
    MarkSuperseded(MarkSuperseded),
    Schedule(ScheduleJob),
    RecordMaterial(RecordMaterialUsed),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event: JobCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: PrintJobId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub customer_id: UserId,
    pub settings: PrintSettings,
    pub model_dimensions: Option<BuildVolume>,
    pub priority: u8,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JobStatusChanged. `progress` is the progress after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub from: JobStatus,
    pub to: JobStatus,
    pub progress: u8,
    pub failure_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrintJobEvent {
    Created(JobCreated),
    StatusChanged(JobStatusChanged),
    ProgressReported {
        from: u8,
        to: u8,
        occurred_at: DateTime<Utc>,
    },
    PrinterAssigned {
        printer_id: PrinterId,
        occurred_at: DateTime<Utc>,
    },
    PriorityChanged {
        from: u8,
        to: u8,
        occurred_at: DateTime<Utc>,
    },
    NoteAdded {
        text: String,
        occurred_at: DateTime<Utc>,
    },
    Superseded {
        by: PrintJobId,
        occurred_at: DateTime<Utc>,
    },
    Scheduled {
        start: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    MaterialRecorded {
        grams: f64,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for PrintJobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PrintJobEvent::Created(_) => "printing.job.created",
            PrintJobEvent::StatusChanged(_) => "printing.job.status_changed",
            PrintJobEvent::ProgressReported { .. } => "printing.job.progress_reported",
            PrintJobEvent::PrinterAssigned { .. } => "printing.job.printer_assigned",
            PrintJobEvent::PriorityChanged { .. } => "printing.job.priority_changed",
            PrintJobEvent::NoteAdded { .. } => "printing.job.note_added",
            PrintJobEvent::Superseded { .. } => "printing.job.superseded",
            PrintJobEvent::Scheduled { .. } => "printing.job.scheduled",
            PrintJobEvent::MaterialRecorded { .. } => "printing.job.material_recorded",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PrintJobEvent::Created(e) => e.occurred_at,
            PrintJobEvent::StatusChanged(e) => e.occurred_at,
            PrintJobEvent::ProgressReported { occurred_at, .. }
            | PrintJobEvent::PrinterAssigned { occurred_at, .. }
            | PrintJobEvent::PriorityChanged { occurred_at, .. }
            | PrintJobEvent::NoteAdded { occurred_at, .. }
            | PrintJobEvent::Superseded { occurred_at, .. }
            | PrintJobEvent::Scheduled { occurred_at, .. }
            | PrintJobEvent::MaterialRecorded { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for PrintJob {
    type Command = PrintJobCommand;
    type Event = PrintJobEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PrintJobEvent::Created(e) => {
                self.id = e.job_id;
                self.order_id = Some(e.order_id);
                self.order_item_id = Some(e.order_item_id);
                self.customer_id = Some(e.customer_id);
                self.settings = e.settings.clone();
                self.model_dimensions = e.model_dimensions;
                self.priority = e.priority;
                self.status = JobStatus::Pending;
                self.progress = 0;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PrintJobEvent::StatusChanged(e) => {
                self.status = e.to;
                self.progress = e.progress;
                match e.to {
                    JobStatus::Printing if self.started_at.is_none() => {
                        self.started_at = Some(e.occurred_at);
                    }
                    JobStatus::Completed => self.completed_at = Some(e.occurred_at),
                    JobStatus::Failed => self.failure_reason = e.failure_reason.clone(),
                    _ => {}
                }
            }
            PrintJobEvent::ProgressReported { to, .. } => self.progress = *to,
            PrintJobEvent::PrinterAssigned { printer_id, .. } => {
                self.printer_id = Some(*printer_id);
            }
            PrintJobEvent::PriorityChanged { to, .. } => self.priority = *to,
            PrintJobEvent::NoteAdded { text, occurred_at } => self.notes.push(JobNote {
                text: text.clone(),
                at: *occurred_at,
            }),
            PrintJobEvent::Superseded { by, .. } => self.superseded_by = Some(*by),
            PrintJobEvent::Scheduled { start, .. } => self.scheduled_start_time = Some(*start),
            PrintJobEvent::MaterialRecorded { grams, .. } => {
                self.material_used_grams = Some(*grams);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.created && !matches!(command, PrintJobCommand::Create(_)) {
            return Err(DomainError::not_found());
        }

        match command {
            PrintJobCommand::Create(cmd) => self.handle_create(cmd),
            PrintJobCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            PrintJobCommand::ReportProgress(cmd) => self.handle_report_progress(cmd),
            PrintJobCommand::AssignPrinter(cmd) => self.handle_assign_printer(cmd),
            PrintJobCommand::SetPriority(cmd) => self.handle_set_priority(cmd),
            PrintJobCommand::AddNote(cmd) => self.handle_add_note(cmd),
            PrintJobCommand::MarkSuperseded(cmd) => self.handle_mark_superseded(cmd),
            PrintJobCommand::Schedule(cmd) => self.handle_schedule(cmd),
            PrintJobCommand::RecordMaterial(cmd) => self.handle_record_material(cmd),
        }
    }
}

impl PrintJob {
    fn handle_create(&self, cmd: &CreatePrintJob) -> Result<Vec<PrintJobEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("print job already exists"));
        }
        cmd.settings.validate()?;
        let priority = cmd.priority.unwrap_or(DEFAULT_PRIORITY);
        validate_priority(priority)?;

        Ok(vec![PrintJobEvent::Created(JobCreated {
            job_id: cmd.job_id,
            order_id: cmd.order_id,
            order_item_id: cmd.order_item_id,
            customer_id: cmd.customer_id,
            settings: cmd.settings.clone(),
            model_dimensions: cmd.model_dimensions,
            priority,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeJobStatus) -> Result<Vec<PrintJobEvent>, DomainError> {
        if let Some(p) = cmd.progress {
            validate_progress(p)?;
        }

        // Same status: idempotent no-op, except that a printing job may carry
        // a progress value along with the repeated status.
        if cmd.to == self.status {
            return match (self.status, cmd.progress) {
                (JobStatus::Printing, Some(p)) => self.progress_events(p, cmd.occurred_at),
                _ => Ok(vec![]),
            };
        }

        if !self.status.can_transition_to(cmd.to) {
            return Err(DomainError::invalid_transition("print job", self.status, cmd.to));
        }

        let failure_reason = match cmd.to {
            JobStatus::Failed => {
                let reason = cmd
                    .failure_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(DomainError::missing("failure_reason"))?;
                Some(reason.to_string())
            }
            _ => None,
        };

        let progress = match cmd.to {
            JobStatus::Completed => 100,
            JobStatus::Failed | JobStatus::Cancelled => self.progress,
            JobStatus::Printing | JobStatus::PostProcessing => match cmd.progress {
                Some(p) if p < self.progress => {
                    return Err(DomainError::ProgressRegression {
                        current: self.progress,
                        attempted: p,
                    });
                }
                Some(p) => p,
                None => self.progress,
            },
            JobStatus::Pending | JobStatus::Preparing => {
                if cmd.progress.is_some() {
                    return Err(DomainError::invalid_transition(
                        "print job progress",
                        self.status,
                        cmd.to,
                    ));
                }
                self.progress
            }
        };

        Ok(vec![PrintJobEvent::StatusChanged(JobStatusChanged {
            from: self.status,
            to: cmd.to,
            progress,
            failure_reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_report_progress(&self, cmd: &ReportProgress) -> Result<Vec<PrintJobEvent>, DomainError> {
        validate_progress(cmd.progress)?;
        if self.status != JobStatus::Printing {
            return Err(DomainError::invalid_transition(
                "print job progress",
                self.status,
                format!("{}%", cmd.progress),
            ));
        }
        self.progress_events(cmd.progress, cmd.occurred_at)
    }

    fn progress_events(&self, progress: u8, at: DateTime<Utc>) -> Result<Vec<PrintJobEvent>, DomainError> {
        if progress < self.progress {
            return Err(DomainError::ProgressRegression {
                current: self.progress,
                attempted: progress,
            });
        }
        if progress == self.progress {
            return Ok(vec![]);
        }
        Ok(vec![PrintJobEvent::ProgressReported {
            from: self.progress,
            to: progress,
            occurred_at: at,
        }])
    }

    fn handle_assign_printer(&self, cmd: &AssignJobPrinter) -> Result<Vec<PrintJobEvent>, DomainError> {
        self.ensure_active("assign a printer to")?;
        if self.printer_id == Some(cmd.printer_id) {
            return Ok(vec![]);
        }
        Ok(vec![PrintJobEvent::PrinterAssigned {
            printer_id: cmd.printer_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_set_priority(&self, cmd: &SetJobPriority) -> Result<Vec<PrintJobEvent>, DomainError> {
        validate_priority(cmd.priority)?;
        self.ensure_active("reprioritize")?;
        if self.priority == cmd.priority {
            return Ok(vec![]);
        }
        Ok(vec![PrintJobEvent::PriorityChanged {
            from: self.priority,
            to: cmd.priority,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_add_note(&self, cmd: &AddJobNote) -> Result<Vec<PrintJobEvent>, DomainError> {
        let text = cmd.text.trim();
        if text.is_empty() {
            return Err(DomainError::validation("note cannot be empty"));
        }
        Ok(vec![PrintJobEvent::NoteAdded {
            text: text.to_string(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_superseded(&self, cmd: &MarkSuperseded) -> Result<Vec<PrintJobEvent>, DomainError> {
        if self.status != JobStatus::Failed {
            return Err(DomainError::invariant("only failed jobs can be superseded"));
        }
        match self.superseded_by {
            Some(by) if by == cmd.by => Ok(vec![]),
            Some(_) => Err(DomainError::conflict("job was already superseded by another retry")),
            None => Ok(vec![PrintJobEvent::Superseded {
                by: cmd.by,
                occurred_at: cmd.occurred_at,
            }]),
        }
    }

    fn handle_schedule(&self, cmd: &ScheduleJob) -> Result<Vec<PrintJobEvent>, DomainError> {
        self.ensure_active("schedule")?;
        if self.status.has_started_printing() {
            return Err(DomainError::invariant("job has already started printing"));
        }
        Ok(vec![PrintJobEvent::Scheduled {
            start: cmd.start,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_record_material(&self, cmd: &RecordMaterialUsed) -> Result<Vec<PrintJobEvent>, DomainError> {
        if !(cmd.grams.is_finite() && cmd.grams >= 0.0) {
            return Err(DomainError::validation("material used must be a non-negative amount"));
        }
        Ok(vec![PrintJobEvent::MaterialRecorded {
            grams: cmd.grams,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if self.status.is_terminal() || self.superseded_by.is_some() {
            return Err(DomainError::invariant(format!(
                "cannot {action} a {} job",
                self.status
            )));
        }
        Ok(())
    }
}

fn validate_progress(progress: u8) -> Result<(), DomainError> {
    if progress > 100 {
        return Err(DomainError::validation("progress must be between 0 and 100"));
    }
    Ok(())
}

fn validate_priority(priority: u8) -> Result<(), DomainError> {
    if !(1..=10).contains(&priority) {
        return Err(DomainError::validation("priority must be between 1 and 10"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use printforge_events::execute;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_job() -> PrintJob {
        let id = PrintJobId::new();
        let mut job = PrintJob::empty(id);
        execute(
            &mut job,
            &PrintJobCommand::Create(CreatePrintJob {
                job_id: id,
                order_id: OrderId::new(),
                order_item_id: OrderItemId::new(),
                customer_id: UserId::new(),
                settings: PrintSettings::default(),
                model_dimensions: None,
                priority: None,
                occurred_at: now(),
            }),
        )
        .unwrap();
        job
    }

    fn change(to: JobStatus) -> PrintJobCommand {
        PrintJobCommand::ChangeStatus(ChangeJobStatus {
            to,
            progress: None,
            failure_reason: None,
            occurred_at: now(),
        })
    }

    fn printing_job() -> PrintJob {
        let mut job = created_job();
        execute(&mut job, &change(JobStatus::Preparing)).unwrap();
        execute(&mut job, &change(JobStatus::Printing)).unwrap();
        job
    }

    fn progress(p: u8) -> PrintJobCommand {
        PrintJobCommand::ReportProgress(ReportProgress {
            progress: p,
            occurred_at: now(),
        })
    }

    #[test]
    fn status_strings_match_wire_names() {
        assert_eq!(JobStatus::PostProcessing.to_string(), "post-processing");
        assert_eq!("post-processing".parse::<JobStatus>().unwrap(), JobStatus::PostProcessing);
    }

    #[test]
    fn cannot_skip_preparing() {
        let job = created_job();
        let err = job.handle(&change(JobStatus::Printing)).unwrap_err();
        match err {
            DomainError::InvalidTransition { from, to, .. } if from == "pending" && to == "printing" => {}
            _ => panic!("Expected InvalidTransition pending -> printing"),
        }
    }

    #[test]
    fn same_status_is_a_no_op() {
        let mut job = created_job();
        execute(&mut job, &change(JobStatus::Preparing)).unwrap();
        let version = job.version();
        assert!(execute(&mut job, &change(JobStatus::Preparing)).unwrap().is_empty());
        assert_eq!(job.version(), version);
    }

    #[test]
    fn failing_requires_a_reason() {
        let job = printing_job();
        let err = job.handle(&change(JobStatus::Failed)).unwrap_err();
        assert_eq!(err, DomainError::MissingRequiredField("failure_reason"));

        let blank = PrintJobCommand::ChangeStatus(ChangeJobStatus {
            to: JobStatus::Failed,
            progress: None,
            failure_reason: Some("   ".to_string()),
            occurred_at: now(),
        });
        assert_eq!(
            job.handle(&blank).unwrap_err(),
            DomainError::MissingRequiredField("failure_reason")
        );
    }

    #[test]
    fn completion_forces_full_progress() {
        let mut job = printing_job();
        execute(&mut job, &progress(97)).unwrap();
        execute(&mut job, &change(JobStatus::Completed)).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 100);
        assert!(job.completed_at().is_some());
    }

    #[test]
    fn failure_freezes_progress() {
        let mut job = printing_job();
        execute(&mut job, &progress(40)).unwrap();
        execute(
            &mut job,
            &PrintJobCommand::ChangeStatus(ChangeJobStatus {
                to: JobStatus::Failed,
                progress: Some(90),
                failure_reason: Some("nozzle clog".to_string()),
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(job.progress(), 40);
        assert_eq!(job.failure_reason(), Some("nozzle clog"));
    }

    #[test]
    fn progress_rejected_outside_printing() {
        let job = created_job();
        let err = job.handle(&progress(10)).unwrap_err();
        match err {
            DomainError::InvalidTransition { subject, .. } if subject == "print job progress" => {}
            _ => panic!("Expected InvalidTransition for progress on pending job"),
        }
    }

    #[test]
    fn progress_regression_is_rejected() {
        let mut job = printing_job();
        execute(&mut job, &progress(55)).unwrap();
        let err = job.handle(&progress(10)).unwrap_err();
        assert_eq!(
            err,
            DomainError::ProgressRegression {
                current: 55,
                attempted: 10
            }
        );
    }

    #[test]
    fn terminal_jobs_reject_transitions() {
        let mut job = printing_job();
        execute(&mut job, &change(JobStatus::Cancelled)).unwrap();
        let err = job.handle(&change(JobStatus::Printing)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn priority_must_be_in_range() {
        let job = created_job();
        let cmd = PrintJobCommand::SetPriority(SetJobPriority {
            priority: 11,
            occurred_at: now(),
        });
        assert!(matches!(job.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn only_failed_jobs_can_be_superseded() {
        let job = printing_job();
        let cmd = PrintJobCommand::MarkSuperseded(MarkSuperseded {
            by: PrintJobId::new(),
            occurred_at: now(),
        });
        assert!(matches!(job.handle(&cmd), Err(DomainError::InvariantViolation(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn progress_never_decreases_while_printing(updates in proptest::collection::vec(0u8..=100, 1..40)) {
            let mut job = printing_job();
            let mut last = job.progress();
            for p in updates {
                let _ = execute(&mut job, &progress(p));
                prop_assert!(job.progress() >= last);
                last = job.progress();
            }
        }
    }
}
