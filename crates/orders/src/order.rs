use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printforge_core::{
    Actor, Aggregate, AggregateRoot, DomainError, Money, OrderId, OrderItemId, UserId,
};
use printforge_events::Event;
use printforge_printing::{ModelValidationResult, PrintSettings};

use crate::derive::{Derivation, JobState, OrderFacts, derive_status};
use crate::status::{OrderStatus, PaymentStatus};

/// What an on-demand line item needs printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandSpec {
    #[serde(default)]
    pub settings: PrintSettings,
    #[serde(default)]
    pub model: Option<ModelValidationResult>,
    #[serde(default)]
    pub priority: Option<u8>,
}

/// Checkout input for one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub on_demand: Option<OnDemandSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub on_demand: Option<OnDemandSpec>,
}

impl OrderItem {
    pub fn from_new(id: OrderItemId, item: NewOrderItem) -> Self {
        Self {
            id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            on_demand: item.on_demand,
        }
    }

    /// `None` when the line overflows the money range.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    pub fn is_on_demand(&self) -> bool {
        self.on_demand.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNote {
    pub text: String,
    pub author: Actor,
    pub at: DateTime<Utc>,
}

/// An administrative status pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub status: OrderStatus,
    pub reason: String,
    pub by: Actor,
    pub at: DateTime<Utc>,
}

/// `PF-YYYYMMDD-XXXXXX` where the suffix is 6 uppercase alphanumerics.
pub fn format_order_number(at: DateTime<Utc>, suffix: &str) -> String {
    format!("PF-{}-{}", at.format("%Y%m%d"), suffix)
}

pub fn is_valid_order_number(number: &str) -> bool {
    let Some(rest) = number.strip_prefix("PF-") else {
        return false;
    };
    let Some((date, suffix)) = rest.split_once('-') else {
        return false;
    };
    date.len() == 8
        && date.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == 6
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

fn out_of_range() -> DomainError {
    DomainError::validation("amount out of range")
}

/// Aggregate root: Order.
///
/// # Invariants
/// - `status` always equals [`derive_status`] over the order's facts and the
///   job states last reconciled.
/// - Totals are fixed at placement: `total = subtotal - discount + shipping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    number: String,
    customer_id: Option<UserId>,
    items: Vec<OrderItem>,
    subtotal: Money,
    discount: Money,
    shipping: Money,
    total: Money,
    payment_method: String,
    payment_status: PaymentStatus,
    status: OrderStatus,
    cancelled: bool,
    cancel_reason: Option<String>,
    fulfilled: bool,
    override_status: Option<OverrideRecord>,
    /// Stored status when the override was set; restored when it is cleared.
    status_before_override: Option<OrderStatus>,
    discrepancy: bool,
    notes: Vec<OrderNote>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            number: String::new(),
            customer_id: None,
            items: Vec::new(),
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            shipping: Money::ZERO,
            total: Money::ZERO,
            payment_method: String::new(),
            payment_status: PaymentStatus::Pending,
            status: OrderStatus::Pending,
            cancelled: false,
            cancel_reason: None,
            fulfilled: false,
            override_status: None,
            status_before_override: None,
            discrepancy: false,
            notes: Vec::new(),
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn on_demand_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|i| i.is_on_demand())
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn shipping(&self) -> Money {
        self.shipping
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled
    }

    pub fn override_record(&self) -> Option<&OverrideRecord> {
        self.override_status.as_ref()
    }

    pub fn has_discrepancy(&self) -> bool {
        self.discrepancy
    }

    pub fn notes(&self) -> &[OrderNote] {
        &self.notes
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn facts(&self) -> OrderFacts {
        OrderFacts {
            current: self.status,
            payment: self.payment_status,
            cancelled: self.cancelled,
            fulfilled: self.fulfilled,
            override_status: self.override_status.as_ref().map(|o| o.status),
        }
    }

    /// Read-only recomputation of the aggregate status.
    pub fn derive(&self, jobs: &[JobState]) -> Derivation {
        derive_status(&self.facts(), jobs)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

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

/// Command: PlaceOrder (checkout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub number: String,
    pub customer_id: UserId,
    pub items: Vec<OrderItem>,
    pub discount: Money,
    pub shipping: Money,
    pub payment_method: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderCommand {
    Place(PlaceOrder),
    /// An explicit status request, translated into the fact it stands for.
    RequestStatus {
        to: OrderStatus,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    RecordPayment {
        status: PaymentStatus,
        occurred_at: DateTime<Utc>,
    },
    /// Re-derive the status from the current job states.
    Reconcile {
        jobs: Vec<JobState>,
        occurred_at: DateTime<Utc>,
    },
    Override {
        status: OrderStatus,
        reason: String,
        by: Actor,
        occurred_at: DateTime<Utc>,
    },
    ClearOverride {
        occurred_at: DateTime<Utc>,
    },
    AddNote {
        text: String,
        author: Actor,
        occurred_at: DateTime<Utc>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub number: String,
    pub customer_id: UserId,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub total: Money,
    pub payment_method: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    PaymentRecorded {
        from: PaymentStatus,
        to: PaymentStatus,
        occurred_at: DateTime<Utc>,
    },
    CancellationRequested {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Fulfilled {
        occurred_at: DateTime<Utc>,
    },
    StatusChanged {
        from: OrderStatus,
        to: OrderStatus,
        occurred_at: DateTime<Utc>,
    },
    DiscrepancyChanged {
        flagged: bool,
        occurred_at: DateTime<Utc>,
    },
    OverrideSet(OverrideRecord),
    OverrideCleared {
        occurred_at: DateTime<Utc>,
    },
    NoteAdded(OrderNote),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "orders.order.placed",
            OrderEvent::PaymentRecorded { .. } => "orders.order.payment_recorded",
            OrderEvent::CancellationRequested { .. } => "orders.order.cancellation_requested",
            OrderEvent::Fulfilled { .. } => "orders.order.fulfilled",
            OrderEvent::StatusChanged { .. } => "orders.order.status_changed",
            OrderEvent::DiscrepancyChanged { .. } => "orders.order.discrepancy_changed",
            OrderEvent::OverrideSet(_) => "orders.order.override_set",
            OrderEvent::OverrideCleared { .. } => "orders.order.override_cleared",
            OrderEvent::NoteAdded(_) => "orders.order.note_added",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed(e) => e.occurred_at,
            OrderEvent::OverrideSet(o) => o.at,
            OrderEvent::NoteAdded(n) => n.at,
            OrderEvent::PaymentRecorded { occurred_at, .. }
            | OrderEvent::CancellationRequested { occurred_at, .. }
            | OrderEvent::Fulfilled { occurred_at }
            | OrderEvent::StatusChanged { occurred_at, .. }
            | OrderEvent::DiscrepancyChanged { occurred_at, .. }
            | OrderEvent::OverrideCleared { occurred_at } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed(e) => {
                self.id = e.order_id;
                self.number = e.number.clone();
                self.customer_id = Some(e.customer_id);
                self.items = e.items.clone();
                self.subtotal = e.subtotal;
                self.discount = e.discount;
                self.shipping = e.shipping;
                self.total = e.total;
                self.payment_method = e.payment_method.clone();
                self.payment_status = PaymentStatus::Pending;
                self.status = OrderStatus::Pending;
                if let Some(text) = &e.notes {
                    self.notes.push(OrderNote {
                        text: text.clone(),
                        author: Actor::Customer(e.customer_id),
                        at: e.occurred_at,
                    });
                }
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::PaymentRecorded { to, .. } => self.payment_status = *to,
            OrderEvent::CancellationRequested {
                reason,
                occurred_at,
            } => {
                self.cancelled = true;
                self.cancel_reason = reason.clone();
                self.notes.push(OrderNote {
                    text: match reason {
                        Some(r) => format!("Order cancelled: {r}"),
                        None => "Order cancelled".to_string(),
                    },
                    author: Actor::System,
                    at: *occurred_at,
                });
            }
            OrderEvent::Fulfilled { .. } => self.fulfilled = true,
            OrderEvent::StatusChanged { to, .. } => self.status = *to,
            OrderEvent::DiscrepancyChanged { flagged, .. } => self.discrepancy = *flagged,
            OrderEvent::OverrideSet(record) => {
                if self.override_status.is_none() {
                    self.status_before_override = Some(self.status);
                }
                self.override_status = Some(record.clone());
            }
            OrderEvent::OverrideCleared { .. } => {
                self.override_status = None;
                if let Some(previous) = self.status_before_override.take() {
                    self.status = previous;
                }
            }
            OrderEvent::NoteAdded(note) => self.notes.push(note.clone()),
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.created && !matches!(command, OrderCommand::Place(_)) {
            return Err(DomainError::not_found());
        }

        match command {
            OrderCommand::Place(cmd) => self.handle_place(cmd),
            OrderCommand::RequestStatus {
                to,
                reason,
                occurred_at,
            } => self.handle_request_status(*to, reason.as_deref(), *occurred_at),
            OrderCommand::RecordPayment {
                status,
                occurred_at,
            } => Ok(self.payment_events(*status, *occurred_at)),
            OrderCommand::Reconcile { jobs, occurred_at } => {
                Ok(self.reconcile_events(jobs, *occurred_at))
            }
            OrderCommand::Override {
                status,
                reason,
                by,
                occurred_at,
            } => self.handle_override(*status, reason, *by, *occurred_at),
            OrderCommand::ClearOverride { occurred_at } => Ok(match self.override_status {
                Some(_) => vec![OrderEvent::OverrideCleared {
                    occurred_at: *occurred_at,
                }],
                None => vec![],
            }),
            OrderCommand::AddNote {
                text,
                author,
                occurred_at,
            } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(DomainError::validation("note cannot be empty"));
                }
                Ok(vec![OrderEvent::NoteAdded(OrderNote {
                    text: text.to_string(),
                    author: *author,
                    at: *occurred_at,
                })])
            }
        }
    }
}

impl Order {
    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if !is_valid_order_number(&cmd.number) {
            return Err(DomainError::validation(format!(
                "malformed order number '{}'",
                cmd.number
            )));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }

        for item in &cmd.items {
            if item.product_name.trim().is_empty() {
                return Err(DomainError::validation("product name cannot be empty"));
            }
            if item.quantity == 0 {
                return Err(DomainError::validation("quantity must be at least 1"));
            }
            item.unit_price.non_negative("unit_price")?;

            if let Some(spec) = &item.on_demand {
                spec.settings.validate()?;
                if let Some(reason) = spec.model.as_ref().and_then(|m| m.rejection_reason()) {
                    return Err(DomainError::validation(reason));
                }
                if let Some(p) = spec.priority {
                    if !(1..=10).contains(&p) {
                        return Err(DomainError::validation("priority must be between 1 and 10"));
                    }
                }
            }
        }

        let discount = cmd.discount.non_negative("discount")?;
        let shipping = cmd.shipping.non_negative("shipping")?;
        let subtotal = cmd
            .items
            .iter()
            .map(OrderItem::line_total)
            .try_fold(Money::ZERO, |acc, line| acc.checked_add(line?))
            .ok_or_else(out_of_range)?;
        if discount > subtotal {
            return Err(DomainError::validation("discount cannot exceed subtotal"));
        }
        let total = subtotal
            .checked_sub(discount)
            .and_then(|net| net.checked_add(shipping))
            .ok_or_else(out_of_range)?;

        Ok(vec![OrderEvent::Placed(OrderPlaced {
            order_id: cmd.order_id,
            number: cmd.number.clone(),
            customer_id: cmd.customer_id,
            items: cmd.items.clone(),
            subtotal,
            discount,
            shipping,
            total,
            payment_method: cmd.payment_method.trim().to_string(),
            notes: cmd
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_status(
        &self,
        to: OrderStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if to == self.status {
            return Ok(vec![]);
        }
        if !self.status.allowed_requests().contains(&to) {
            return Err(DomainError::invalid_transition("order", self.status, to));
        }

        match to {
            OrderStatus::Processing => {
                if self.payment_status == PaymentStatus::Confirmed {
                    // Nothing left to confirm: a job failure is resolved by
                    // requeueing, not by asking for `processing`.
                    return Err(DomainError::invalid_transition("order", self.status, to));
                }
                Ok(self.payment_events(PaymentStatus::Confirmed, at))
            }
            OrderStatus::Cancelled => {
                if self.cancelled {
                    return Ok(vec![]);
                }
                Ok(vec![OrderEvent::CancellationRequested {
                    reason: reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
                    occurred_at: at,
                }])
            }
            OrderStatus::Disputed => Ok(self.payment_events(PaymentStatus::Disputed, at)),
            OrderStatus::Refunded => Ok(self.payment_events(PaymentStatus::Refunded, at)),
            OrderStatus::Completed => {
                if self.on_demand_items().next().is_some() {
                    return Err(DomainError::invalid_transition("order", self.status, to));
                }
                Ok(vec![OrderEvent::Fulfilled { occurred_at: at }])
            }
            OrderStatus::Pending | OrderStatus::InProduction | OrderStatus::Failed => {
                Err(DomainError::invalid_transition("order", self.status, to))
            }
        }
    }

    fn payment_events(&self, to: PaymentStatus, at: DateTime<Utc>) -> Vec<OrderEvent> {
        if self.payment_status == to {
            return vec![];
        }
        vec![OrderEvent::PaymentRecorded {
            from: self.payment_status,
            to,
            occurred_at: at,
        }]
    }

    fn reconcile_events(&self, jobs: &[JobState], at: DateTime<Utc>) -> Vec<OrderEvent> {
        let derived = self.derive(jobs);
        let mut events = Vec::new();
        if derived.status != self.status {
            events.push(OrderEvent::StatusChanged {
                from: self.status,
                to: derived.status,
                occurred_at: at,
            });
        }
        if derived.discrepancy != self.discrepancy {
            events.push(OrderEvent::DiscrepancyChanged {
                flagged: derived.discrepancy,
                occurred_at: at,
            });
        }
        events
    }

    fn handle_override(
        &self,
        status: OrderStatus,
        reason: &str,
        by: Actor,
        at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::missing("reason"));
        }
        if self.override_status.as_ref().map(|o| o.status) == Some(status) {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::OverrideSet(OverrideRecord {
            status,
            reason: reason.to_string(),
            by,
            at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printforge_events::execute;
    use printforge_printing::JobStatus;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn item(on_demand: bool) -> OrderItem {
        OrderItem {
            id: OrderItemId::new(),
            product_name: "Dragon miniature".to_string(),
            quantity: 2,
            unit_price: Money::from_cents(1250),
            on_demand: on_demand.then(|| OnDemandSpec {
                settings: PrintSettings::default(),
                model: None,
                priority: None,
            }),
        }
    }

    fn place(items: Vec<OrderItem>, discount: Money) -> PlaceOrder {
        PlaceOrder {
            order_id: OrderId::new(),
            number: "PF-20240101-AB12CD".to_string(),
            customer_id: UserId::new(),
            items,
            discount,
            shipping: Money::from_cents(500),
            payment_method: "pix".to_string(),
            notes: None,
            occurred_at: now(),
        }
    }

    fn placed(items: Vec<OrderItem>) -> Order {
        let cmd = place(items, Money::ZERO);
        let mut order = Order::empty(cmd.order_id);
        execute(&mut order, &OrderCommand::Place(cmd)).unwrap();
        order
    }

    fn request(to: OrderStatus) -> OrderCommand {
        OrderCommand::RequestStatus {
            to,
            reason: None,
            occurred_at: now(),
        }
    }

    fn reconcile(order: &mut Order, jobs: &[JobStatus]) {
        let jobs = jobs
            .iter()
            .map(|s| JobState {
                status: *s,
                started_printing: s.has_started_printing(),
            })
            .collect();
        execute(
            order,
            &OrderCommand::Reconcile {
                jobs,
                occurred_at: now(),
            },
        )
        .unwrap();
    }

    #[test]
    fn place_computes_totals() {
        let order = placed(vec![item(true), item(false)]);
        assert_eq!(order.subtotal(), Money::from_cents(5000));
        assert_eq!(order.total(), Money::from_cents(5500));
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        let cmd = place(vec![item(false)], Money::from_cents(999_999));
        let err = Order::empty(cmd.order_id)
            .handle(&OrderCommand::Place(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("discount") => {}
            _ => panic!("Expected Validation for oversized discount"),
        }
    }

    #[test]
    fn oversized_amounts_are_rejected_at_checkout() {
        let mut huge = item(false);
        huge.unit_price = "79228162514264337593543950335".parse().unwrap();
        let cmd = place(vec![huge], Money::ZERO);
        let err = Order::empty(cmd.order_id)
            .handle(&OrderCommand::Place(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("out of range") => {}
            other => panic!("Expected Validation for overflowing total, got {other:?}"),
        }
    }

    #[test]
    fn invalid_model_rejects_order() {
        let mut bad = item(true);
        if let Some(spec) = bad.on_demand.as_mut() {
            spec.model = Some(ModelValidationResult {
                valid: false,
                file_name: "broken.stl".to_string(),
                dimensions: None,
                estimated_print_hours: None,
                errors: vec!["non-manifold mesh".to_string()],
            });
        }
        let cmd = place(vec![bad], Money::ZERO);
        let err = Order::empty(cmd.order_id)
            .handle(&OrderCommand::Place(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("non-manifold") => {}
            _ => panic!("Expected Validation carrying the model error"),
        }
    }

    #[test]
    fn processing_request_confirms_payment() {
        let mut order = placed(vec![item(true)]);
        execute(&mut order, &request(OrderStatus::Processing)).unwrap();
        reconcile(&mut order, &[JobStatus::Preparing]);
        assert_eq!(order.payment_status(), PaymentStatus::Confirmed);
        assert_eq!(order.status(), OrderStatus::Processing);
    }

    #[test]
    fn derived_statuses_cannot_be_requested() {
        let order = placed(vec![item(true)]);
        let err = order.handle(&request(OrderStatus::InProduction)).unwrap_err();
        match err {
            DomainError::InvalidTransition { from, to, .. }
                if from == "pending" && to == "in_production" => {}
            _ => panic!("Expected InvalidTransition with current and attempted status"),
        }
    }

    #[test]
    fn completing_requires_no_print_jobs() {
        let mut order = placed(vec![item(true)]);
        execute(&mut order, &request(OrderStatus::Processing)).unwrap();
        reconcile(&mut order, &[JobStatus::Preparing]);
        assert!(order.handle(&request(OrderStatus::Completed)).is_err());

        let mut stock_only = placed(vec![item(false)]);
        execute(&mut stock_only, &request(OrderStatus::Processing)).unwrap();
        reconcile(&mut stock_only, &[]);
        execute(&mut stock_only, &request(OrderStatus::Completed)).unwrap();
        reconcile(&mut stock_only, &[]);
        assert_eq!(stock_only.status(), OrderStatus::Completed);
    }

    #[test]
    fn cancellation_records_reason_as_note() {
        let mut order = placed(vec![item(true)]);
        execute(
            &mut order,
            &OrderCommand::RequestStatus {
                to: OrderStatus::Cancelled,
                reason: Some("customer changed mind".to_string()),
                occurred_at: now(),
            },
        )
        .unwrap();
        reconcile(&mut order, &[JobStatus::Cancelled]);

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(order.notes().iter().any(|n| n.text.contains("customer changed mind")));
    }

    #[test]
    fn terminal_orders_reject_requests() {
        let mut order = placed(vec![item(true)]);
        execute(&mut order, &request(OrderStatus::Cancelled)).unwrap();
        reconcile(&mut order, &[JobStatus::Cancelled]);

        assert!(matches!(
            order.handle(&request(OrderStatus::Refunded)),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert!(order.handle(&request(OrderStatus::Cancelled)).unwrap().is_empty());
    }

    #[test]
    fn override_requires_reason_and_pins_status() {
        let mut order = placed(vec![item(true)]);
        let missing = OrderCommand::Override {
            status: OrderStatus::Completed,
            reason: " ".to_string(),
            by: Actor::System,
            occurred_at: now(),
        };
        assert_eq!(order.handle(&missing).unwrap_err(), DomainError::MissingRequiredField("reason"));

        execute(
            &mut order,
            &OrderCommand::Override {
                status: OrderStatus::Completed,
                reason: "delivered by hand".to_string(),
                by: Actor::System,
                occurred_at: now(),
            },
        )
        .unwrap();
        reconcile(&mut order, &[JobStatus::Pending]);
        assert_eq!(order.status(), OrderStatus::Completed);

        execute(&mut order, &OrderCommand::ClearOverride { occurred_at: now() }).unwrap();
        reconcile(&mut order, &[JobStatus::Pending]);
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn order_number_format() {
        assert!(is_valid_order_number("PF-20240131-Z9Y8X7"));
        assert!(!is_valid_order_number("PF-2024013-Z9Y8X7"));
        assert!(!is_valid_order_number("PF-20240131-z9y8x7"));
        assert!(!is_valid_order_number("XX-20240131-Z9Y8X7"));
    }
}
