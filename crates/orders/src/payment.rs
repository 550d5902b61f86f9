//! Payment provider seam.
//!
//! Provider adapters live outside this workspace; all the engine consumes is
//! a provider status string mapped through [`map_gateway_status`].

use thiserror::Error;

use crate::status::PaymentStatus;

/// Map a provider's transaction status to a payment signal.
///
/// Unknown statuses return `None` and must not change the order.
pub fn map_gateway_status(provider_status: &str) -> Option<PaymentStatus> {
    match provider_status.trim().to_ascii_lowercase().as_str() {
        "pending" | "in_process" => Some(PaymentStatus::Pending),
        "approved" | "authorized" => Some(PaymentStatus::Confirmed),
        "cancelled" => Some(PaymentStatus::Cancelled),
        "refunded" => Some(PaymentStatus::Refunded),
        "charged_back" => Some(PaymentStatus::Disputed),
        "failed" | "rejected" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    #[error("unknown transaction '{0}'")]
    UnknownTransaction(String),

    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Adapter over a payment provider (blocking, like every engine call).
pub trait PaymentGateway: Send + Sync {
    /// Provider name used in logs and notes (e.g. "mercadopago").
    fn name(&self) -> &str;

    /// Current provider-side status string for a transaction.
    fn check_transaction_status(&self, transaction_id: &str) -> Result<String, PaymentGatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_map_to_signals() {
        assert_eq!(map_gateway_status("approved"), Some(PaymentStatus::Confirmed));
        assert_eq!(map_gateway_status("in_process"), Some(PaymentStatus::Pending));
        assert_eq!(map_gateway_status("charged_back"), Some(PaymentStatus::Disputed));
        assert_eq!(map_gateway_status("REJECTED"), Some(PaymentStatus::Failed));
        assert_eq!(map_gateway_status("refunded"), Some(PaymentStatus::Refunded));
        assert_eq!(map_gateway_status("cancelled"), Some(PaymentStatus::Cancelled));
    }

    #[test]
    fn unknown_status_maps_to_nothing() {
        assert_eq!(map_gateway_status("in_mediation"), None);
    }
}
