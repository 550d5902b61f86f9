use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "orders.status.write"). The wildcard
/// `"*"` is granted to administrators and to the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    /// Read any customer's order, timeline and jobs.
    pub const ORDERS_READ_ANY: Permission = Permission::from_static("orders.read_any");
    /// Request order status changes on orders the caller does not own.
    pub const ORDERS_STATUS_WRITE: Permission = Permission::from_static("orders.status.write");
    /// Feed payment provider statuses into the engine.
    pub const ORDERS_PAYMENT_WRITE: Permission = Permission::from_static("orders.payment.write");
    /// Pin or clear an administrative status override.
    pub const ORDERS_OVERRIDE: Permission = Permission::from_static("orders.override");
    pub const ORDERS_NOTES_WRITE: Permission = Permission::from_static("orders.notes.write");

    pub const QUEUE_READ: Permission = Permission::from_static("queue.read");
    pub const QUEUE_WRITE: Permission = Permission::from_static("queue.write");
    /// Move print jobs through their lifecycle.
    pub const JOBS_STATUS_WRITE: Permission = Permission::from_static("jobs.status.write");

    pub const PRINTERS_READ: Permission = Permission::from_static("printers.read");
    pub const PRINTERS_WRITE: Permission = Permission::from_static("printers.write");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
