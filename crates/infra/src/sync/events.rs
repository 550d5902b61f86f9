use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printforge_core::{OrderId, PrintJobId, UserId};

use crate::audit::StatusUpdate;

/// Published on the in-process bus after a change set commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    StatusChanged {
        update: StatusUpdate,
        /// Owner of the order the subject belongs to.
        customer_id: Option<UserId>,
        failure_reason: Option<String>,
        cancel_reason: Option<String>,
    },
    ProgressReported {
        job_id: PrintJobId,
        order_id: OrderId,
        customer_id: Option<UserId>,
        progress: u8,
        occurred_at: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn customer_id(&self) -> Option<UserId> {
        match self {
            SyncEvent::StatusChanged { customer_id, .. }
            | SyncEvent::ProgressReported { customer_id, .. } => *customer_id,
        }
    }
}
