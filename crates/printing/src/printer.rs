//! Physical printers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use printforge_core::{DomainError, DomainResult, Entity, PrintJobId, PrinterId, ValueObject};

use crate::settings::Material;

/// Availability of a printer as seen by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    Idle,
    Printing,
    Maintenance,
    Offline,
}

impl PrinterStatus {
    pub const ALL: [PrinterStatus; 4] = [
        PrinterStatus::Idle,
        PrinterStatus::Printing,
        PrinterStatus::Maintenance,
        PrinterStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterStatus::Idle => "idle",
            PrinterStatus::Printing => "printing",
            PrinterStatus::Maintenance => "maintenance",
            PrinterStatus::Offline => "offline",
        }
    }
}

impl core::fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PrinterStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrinterStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown printer status '{s}'")))
    }
}

/// Usable build volume in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildVolume {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: f64,
}

impl ValueObject for BuildVolume {}

impl BuildVolume {
    pub fn new(x_mm: f64, y_mm: f64, z_mm: f64) -> Self {
        Self { x_mm, y_mm, z_mm }
    }

    pub fn is_positive(&self) -> bool {
        [self.x_mm, self.y_mm, self.z_mm]
            .iter()
            .all(|d| d.is_finite() && *d > 0.0)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.x_mm * factor, self.y_mm * factor, self.z_mm * factor)
    }

    /// Whether `part` fits inside this volume without rotation.
    pub fn fits(&self, part: &BuildVolume) -> bool {
        part.x_mm <= self.x_mm && part.y_mm <= self.y_mm && part.z_mm <= self.z_mm
    }
}

/// Why a printer cannot take a job.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Incompatibility {
    #[error("printer is busy with job {current_job}")]
    Busy { current_job: PrintJobId },

    #[error("printer is {status}")]
    Unavailable { status: PrinterStatus },

    #[error("printer is retired")]
    Retired,

    #[error("printer does not support {required}")]
    Material { required: Material },

    #[error("model does not fit the build volume")]
    BuildVolume,
}

/// Registration input for a printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrinter {
    pub name: String,
    pub model: String,
    pub materials: Vec<Material>,
    pub build_volume: BuildVolume,
}

/// A physical printer (entity; mutated in place by the registry).
///
/// # Invariants
/// - `current_job` is `Some` iff a non-terminal print job holds the printer.
/// - Retired printers never take new jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    id: PrinterId,
    name: String,
    model: String,
    materials: BTreeSet<Material>,
    build_volume: BuildVolume,
    status: PrinterStatus,
    current_job: Option<PrintJobId>,
    idle_since: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Entity for Printer {
    type Id = PrinterId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Printer {
    pub fn register(id: PrinterId, input: NewPrinter, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("printer name cannot be empty"));
        }
        if input.materials.is_empty() {
            return Err(DomainError::validation("printer must support at least one material"));
        }
        if !input.build_volume.is_positive() {
            return Err(DomainError::validation("build volume dimensions must be positive"));
        }

        Ok(Self {
            id,
            name: name.to_string(),
            model: input.model.trim().to_string(),
            materials: input.materials.into_iter().collect(),
            build_volume: input.build_volume,
            status: PrinterStatus::Idle,
            current_job: None,
            idle_since: Some(now),
            retired_at: None,
            created_at: now,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> PrinterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn materials(&self) -> &BTreeSet<Material> {
        &self.materials
    }

    pub fn build_volume(&self) -> BuildVolume {
        self.build_volume
    }

    pub fn status(&self) -> PrinterStatus {
        self.status
    }

    pub fn current_job(&self) -> Option<PrintJobId> {
        self.current_job
    }

    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        self.idle_since
    }

    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_available(&self) -> bool {
        !self.is_retired() && self.status == PrinterStatus::Idle && self.current_job.is_none()
    }

    /// Check whether `job` could be placed on this printer right now.
    ///
    /// Re-assigning the job that already holds the printer is accepted.
    pub fn check_assignable(
        &self,
        job: PrintJobId,
        material: Option<Material>,
        part: Option<BuildVolume>,
    ) -> Result<(), Incompatibility> {
        if self.is_retired() {
            return Err(Incompatibility::Retired);
        }
        match self.current_job {
            Some(current) if current == job => return Ok(()),
            Some(current) => return Err(Incompatibility::Busy { current_job: current }),
            None => {}
        }
        if self.status != PrinterStatus::Idle {
            return Err(Incompatibility::Unavailable {
                status: self.status,
            });
        }
        self.check_capability(material, part)
    }

    /// Static capability check (material + volume), ignoring availability.
    pub fn check_capability(
        &self,
        material: Option<Material>,
        part: Option<BuildVolume>,
    ) -> Result<(), Incompatibility> {
        if let Some(required) = material {
            if !self.materials.contains(&required) {
                return Err(Incompatibility::Material { required });
            }
        }
        if let Some(part) = part {
            if !self.build_volume.fits(&part) {
                return Err(Incompatibility::BuildVolume);
            }
        }
        Ok(())
    }

    /// Reserve the printer for `job`. Callers check [`Printer::check_assignable`] first.
    pub fn assign(&mut self, job: PrintJobId) {
        if self.current_job == Some(job) {
            return;
        }
        self.current_job = Some(job);
        self.status = PrinterStatus::Printing;
        self.idle_since = None;
        self.version += 1;
    }

    /// Free the printer if `job` holds it. Returns whether anything changed.
    pub fn release(&mut self, job: PrintJobId, now: DateTime<Utc>) -> bool {
        if self.current_job != Some(job) {
            return false;
        }
        self.current_job = None;
        if self.status == PrinterStatus::Printing {
            self.status = PrinterStatus::Idle;
            self.idle_since = Some(now);
        }
        self.version += 1;
        true
    }

    /// Operator-driven status change (idle/maintenance/offline).
    ///
    /// `printing` is only ever entered through [`Printer::assign`].
    pub fn set_status(&mut self, status: PrinterStatus, now: DateTime<Utc>) -> Result<bool, Incompatibility> {
        if self.is_retired() {
            return Err(Incompatibility::Retired);
        }
        if let Some(current) = self.current_job {
            return Err(Incompatibility::Busy { current_job: current });
        }
        if self.status == status {
            return Ok(false);
        }
        self.status = status;
        self.idle_since = (status == PrinterStatus::Idle).then_some(now);
        self.version += 1;
        Ok(true)
    }

    pub fn retire(&mut self, now: DateTime<Utc>) -> Result<bool, Incompatibility> {
        if self.is_retired() {
            return Ok(false);
        }
        if let Some(current) = self.current_job {
            return Err(Incompatibility::Busy { current_job: current });
        }
        self.status = PrinterStatus::Offline;
        self.idle_since = None;
        self.retired_at = Some(now);
        self.version += 1;
        Ok(true)
    }
}
