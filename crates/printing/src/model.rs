use serde::{Deserialize, Serialize};

use crate::printer::BuildVolume;

/// Outcome of validating an uploaded 3D model.
///
/// Produced by the upload pipeline; the engine only reads it to decide
/// whether an on-demand item can be queued and which printers can fit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelValidationResult {
    pub valid: bool,
    pub file_name: String,
    #[serde(default)]
    pub dimensions: Option<BuildVolume>,
    #[serde(default)]
    pub estimated_print_hours: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ModelValidationResult {
    pub fn valid(file_name: impl Into<String>, dimensions: Option<BuildVolume>) -> Self {
        Self {
            valid: true,
            file_name: file_name.into(),
            dimensions,
            estimated_print_hours: None,
            errors: Vec::new(),
        }
    }

    /// Human-readable reason when the model is rejected.
    pub fn rejection_reason(&self) -> Option<String> {
        if self.valid {
            return None;
        }
        if self.errors.is_empty() {
            Some(format!("model '{}' failed validation", self.file_name))
        } else {
            Some(format!("model '{}': {}", self.file_name, self.errors.join("; ")))
        }
    }
}
