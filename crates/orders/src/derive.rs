//! Aggregate order status derivation.
//!
//! A pure function of the order's recorded facts and the states of its
//! (non-superseded) print jobs. The engine stores exactly what this returns,
//! so recomputing it at any time must reproduce the stored status.

use serde::{Deserialize, Serialize};

use printforge_printing::JobStatus;

use crate::status::{OrderStatus, PaymentStatus};

/// Order-side inputs to the derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFacts {
    /// Status currently stored on the order (terminal states are sticky).
    pub current: OrderStatus,
    pub payment: PaymentStatus,
    pub cancelled: bool,
    /// Set for orders without print jobs once they have been handed over.
    pub fulfilled: bool,
    pub override_status: Option<OrderStatus>,
}

/// Job-side input: current status and whether it ever started printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub started_printing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    pub status: OrderStatus,
    /// All jobs are terminal, some completed and some cancelled.
    pub discrepancy: bool,
    /// What the rules computed when a terminal status kept it from applying.
    pub blocked: Option<OrderStatus>,
}

pub fn derive_status(facts: &OrderFacts, jobs: &[JobState]) -> Derivation {
    let (computed, discrepancy) = compute(facts, jobs);

    if let Some(pinned) = facts.override_status {
        return Derivation {
            status: pinned,
            discrepancy,
            blocked: None,
        };
    }

    let current = facts.current;
    let leaves_terminal = current.is_terminal()
        && computed != current
        && !(current == OrderStatus::Completed && computed == OrderStatus::Refunded);

    if leaves_terminal {
        Derivation {
            status: current,
            discrepancy,
            blocked: Some(computed),
        }
    } else {
        Derivation {
            status: computed,
            discrepancy,
            blocked: None,
        }
    }
}

fn compute(facts: &OrderFacts, jobs: &[JobState]) -> (OrderStatus, bool) {
    match facts.payment {
        PaymentStatus::Refunded => return (OrderStatus::Refunded, false),
        _ if facts.cancelled => return (OrderStatus::Cancelled, false),
        PaymentStatus::Cancelled => return (OrderStatus::Cancelled, false),
        PaymentStatus::Disputed => return (OrderStatus::Disputed, false),
        PaymentStatus::Pending => return (OrderStatus::Pending, false),
        PaymentStatus::Failed => return (OrderStatus::Failed, false),
        PaymentStatus::Confirmed => {}
    }

    if jobs.is_empty() {
        let status = if facts.fulfilled {
            OrderStatus::Completed
        } else {
            OrderStatus::Processing
        };
        return (status, false);
    }

    if jobs.iter().all(|j| j.status == JobStatus::Completed) {
        return (OrderStatus::Completed, false);
    }

    if jobs.iter().all(|j| j.status.is_terminal()) {
        let any_completed = jobs.iter().any(|j| j.status == JobStatus::Completed);
        let any_failed = jobs.iter().any(|j| j.status == JobStatus::Failed);
        return match (any_completed, any_failed) {
            (_, true) => (OrderStatus::Failed, false),
            (false, false) => (OrderStatus::Cancelled, false),
            // Completed work next to cancelled work: never auto-cancel,
            // leave it for manual review.
            (true, false) => (OrderStatus::InProduction, true),
        };
    }

    if jobs.iter().any(|j| j.started_printing) {
        (OrderStatus::InProduction, false)
    } else {
        (OrderStatus::Processing, false)
    }
}
