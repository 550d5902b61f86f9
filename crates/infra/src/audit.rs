//! Append-only status audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use printforge_core::{Actor, OrderId, PrintJobId};

/// What a status update is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Order(OrderId),
    PrintJob(PrintJobId),
}

impl Subject {
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Order(_) => "order",
            Subject::PrintJob(_) => "print_job",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Subject::Order(id) => *id.as_uuid(),
            Subject::PrintJob(id) => *id.as_uuid(),
        }
    }
}

/// One status mutation on an order or print job.
///
/// Exactly one is written per mutation, in the same change set as the
/// mutation itself. `order_id` is the owning order (for jobs, their parent)
/// so a timeline is a single indexed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: Uuid,
    pub subject: Subject,
    pub order_id: OrderId,
    pub old_status: String,
    pub new_status: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(
        subject: Subject,
        order_id: OrderId,
        old_status: impl core::fmt::Display,
        new_status: impl core::fmt::Display,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject,
            order_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
            actor,
            occurred_at,
        }
    }
}
