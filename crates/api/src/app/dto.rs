use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use printforge_core::{Money, UserId};
use printforge_infra::audit::StatusUpdate;
use printforge_infra::sync::{NewOrder, OrderView, QueueSummary};
use printforge_orders::NewOrderItem;
use printforge_printing::{BuildVolume, Material, NewPrinter, PrintJob, Printer};

use crate::app::services::PlacedOrder;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Staff may place an order on a customer's behalf; defaults to the caller.
    pub customer_id: Option<UserId>,
    pub items: Vec<NewOrderItem>,
    pub discount: Option<Money>,
    pub shipping: Option<Money>,
    pub payment_method: String,
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_new_order(self, caller: UserId) -> NewOrder {
        NewOrder {
            customer_id: self.customer_id.unwrap_or(caller),
            items: self.items,
            discount: self.discount.unwrap_or(Money::ZERO),
            shipping: self.shipping.unwrap_or(Money::ZERO),
            payment_method: self.payment_method,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    /// Provider status, e.g. `approved` or `charged_back`.
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub status: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusRequest {
    pub status: String,
    pub progress: Option<u8>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: u8,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub start: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MaterialUsedRequest {
    pub grams: f64,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    /// Omit to let the registry pick the best free printer.
    pub printer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
    pub order_id: Option<String>,
    pub printer_id: Option<String>,
    #[serde(default)]
    pub include_finished: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPrinterRequest {
    pub name: String,
    pub model: String,
    pub materials: Vec<Material>,
    pub build_volume: BuildVolume,
}

impl RegisterPrinterRequest {
    pub fn into_new_printer(self) -> NewPrinter {
        NewPrinter {
            name: self.name,
            model: self.model,
            materials: self.materials,
            build_volume: self.build_volume,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PrinterStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub process_token: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub process_token: String,
    /// Alternative to the `X-CSRF-Token` header.
    pub csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct NotifyStatusChangeBody {
    pub process_token: String,
    pub user_id: UserId,
    pub old_status: String,
    pub new_status: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyProgressBody {
    pub process_token: String,
    pub user_id: UserId,
    pub percent: u8,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyResultsBody {
    pub process_token: String,
    pub user_id: UserId,
    pub summary: Option<String>,
    pub download_url: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyExpirationBody {
    pub process_token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub process_token: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadAllBody {
    pub process_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreferenceRequest {
    pub notification_type: String,
    pub channel: String,
    pub enabled: bool,
}

// -------------------------
// Response mapping
// -------------------------

pub fn order_view_to_json(view: &OrderView) -> Value {
    json!({
        "order": view.order,
        "jobs": view.jobs,
        "aggregate_status": view.aggregate_status,
    })
}

pub fn placed_order_to_json(placed: &PlacedOrder) -> Value {
    let jobs: serde_json::Map<String, Value> = placed
        .job_tokens
        .iter()
        .map(|(id, token)| (id.to_string(), json!(token)))
        .collect();
    let mut body = order_view_to_json(&placed.view);
    body["process_tokens"] = json!({
        "order": placed.order_token,
        "jobs": jobs,
    });
    body
}

pub fn job_to_json(job: &PrintJob) -> Value {
    json!(job)
}

pub fn printer_to_json(printer: &Printer) -> Value {
    json!(printer)
}

pub fn timeline_to_json(updates: &[StatusUpdate]) -> Value {
    json!({ "items": updates })
}

pub fn queue_summary_to_json(summary: &QueueSummary, tokens: &[(printforge_core::PrintJobId, String)]) -> Value {
    let created_tokens: serde_json::Map<String, Value> = tokens
        .iter()
        .map(|(id, token)| (id.to_string(), json!(token)))
        .collect();
    json!({
        "created": summary.created,
        "assigned": summary.assigned,
        "unassigned": summary.unassigned,
        "process_tokens": created_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_order_defaults_money_and_customer() {
        let caller = UserId::new();
        let req: CreateOrderRequest = serde_json::from_value(json!({
            "items": [{ "product_name": "Benchy", "quantity": 1, "unit_price": "12.50" }],
            "payment_method": "card",
        }))
        .unwrap();

        let order = req.into_new_order(caller);
        assert_eq!(order.customer_id, caller);
        assert_eq!(order.discount, Money::ZERO);
        assert_eq!(order.shipping, Money::ZERO);
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn notifications_query_reads_type_alias() {
        let q: NotificationsQuery =
            serde_json::from_value(json!({ "type": "process_failed", "unread_only": true })).unwrap();
        assert_eq!(q.notification_type.as_deref(), Some("process_failed"));
        assert!(q.unread_only);
        assert!(q.page.is_none());
    }
}
