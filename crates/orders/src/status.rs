use serde::{Deserialize, Serialize};

use printforge_core::DomainError;

/// Commercial status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    InProduction,
    Completed,
    Disputed,
    Cancelled,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::InProduction,
        OrderStatus::Completed,
        OrderStatus::Disputed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::InProduction => "in_production",
            OrderStatus::Completed => "completed",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Which statuses a caller may explicitly request from this one.
    ///
    /// `pending`, `in_production` and `failed` are never requestable: they
    /// only ever result from derivation.
    pub fn allowed_requests(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Processing, Cancelled],
            Processing => &[Cancelled, Disputed, Refunded, Completed],
            InProduction => &[Cancelled, Disputed, Refunded],
            Failed => &[Processing, Cancelled, Disputed, Refunded],
            Disputed => &[Processing, Cancelled, Refunded],
            Completed => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

/// Payment signal as understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Disputed,
    Refunded,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Confirmed,
        PaymentStatus::Disputed,
        PaymentStatus::Refunded,
        PaymentStatus::Cancelled,
        PaymentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Disputed => "disputed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown payment status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_refund_leaves_completed() {
        assert_eq!(OrderStatus::Completed.allowed_requests(), &[OrderStatus::Refunded]);
        assert!(OrderStatus::Cancelled.allowed_requests().is_empty());
        assert!(OrderStatus::Refunded.allowed_requests().is_empty());
    }

    #[test]
    fn derived_statuses_are_never_requestable() {
        for from in OrderStatus::ALL {
            for derived in [OrderStatus::Pending, OrderStatus::InProduction, OrderStatus::Failed] {
                assert!(!from.allowed_requests().contains(&derived));
            }
        }
    }

    #[test]
    fn wire_names_round_trip() {
        assert_eq!("in_production".parse::<OrderStatus>().unwrap(), OrderStatus::InProduction);
        assert!("shipped".parse::<OrderStatus>().is_err());
    }
}
