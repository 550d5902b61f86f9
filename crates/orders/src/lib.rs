//! Orders domain module (event-sourced).
//!
//! The order aggregate never stores a status someone asked for: it records
//! facts (payment, cancellation, fulfilment, override) and derives its status
//! from those facts plus the states of its print jobs.

pub mod derive;
pub mod order;
pub mod payment;
pub mod status;

pub use derive::{Derivation, JobState, OrderFacts, derive_status};
pub use order::{
    NewOrderItem, OnDemandSpec, Order, OrderCommand, OrderEvent, OrderItem, OrderNote,
    OrderPlaced, OverrideRecord, PlaceOrder, format_order_number, is_valid_order_number,
};
pub use payment::{PaymentGateway, PaymentGatewayError, map_gateway_status};
pub use status::{OrderStatus, PaymentStatus};
