use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
///
/// Tokens carry role names; [`permissions_for_roles`] is the single policy
/// source that turns them into permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role::from_static("admin");
    pub const OPERATOR: Role = Role::from_static("operator");
    pub const CUSTOMER: Role = Role::from_static("customer");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Back-office roles act as operators in the audit trail.
    pub fn is_staff(&self) -> bool {
        matches!(self.as_str(), "admin" | "operator")
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role → permission mapping.
///
/// - `admin` grants `*`
/// - `operator` runs the print floor but cannot override order status
/// - customers (and unknown roles) get nothing beyond ownership checks
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(|r| r.as_str() == "admin") {
        return vec![Permission::WILDCARD];
    }

    let mut perms = Vec::new();
    if roles.iter().any(|r| r.as_str() == "operator") {
        perms.extend([
            Permission::ORDERS_READ_ANY,
            Permission::ORDERS_STATUS_WRITE,
            Permission::ORDERS_PAYMENT_WRITE,
            Permission::ORDERS_NOTES_WRITE,
            Permission::QUEUE_READ,
            Permission::QUEUE_WRITE,
            Permission::JOBS_STATUS_WRITE,
            Permission::PRINTERS_READ,
            Permission::PRINTERS_WRITE,
        ]);
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_maps_to_wildcard() {
        assert_eq!(permissions_for_roles(&[Role::ADMIN]), vec![Permission::WILDCARD]);
    }

    #[test]
    fn operator_cannot_override() {
        let perms = permissions_for_roles(&[Role::OPERATOR]);
        assert!(perms.contains(&Permission::JOBS_STATUS_WRITE));
        assert!(!perms.contains(&Permission::ORDERS_OVERRIDE));
    }

    #[test]
    fn customer_has_no_permissions() {
        assert!(permissions_for_roles(&[Role::CUSTOMER]).is_empty());
    }
}
