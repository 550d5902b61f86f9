use std::collections::HashSet;

use thiserror::Error;

use printforge_core::{Actor, UserId};

use crate::{Permission, Role, permissions_for_roles};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: not the owner of this resource")]
    NotOwner,
}

/// Explicit caller context passed into every engine, registry, dispatcher and
/// gateway call.
///
/// Construction is decoupled from transport: the API middleware derives it
/// from bearer claims, the device feed and internal subscribers use the fixed
/// constructors below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    actor: Actor,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl AuthContext {
    /// The engine acting on its own behalf (cascades, payment signals).
    pub fn system() -> Self {
        Self {
            actor: Actor::System,
            roles: Vec::new(),
            permissions: vec![Permission::WILDCARD],
        }
    }

    /// A printer reporting through the device feed.
    pub fn device_feed() -> Self {
        Self {
            actor: Actor::DeviceFeed,
            roles: Vec::new(),
            permissions: vec![Permission::JOBS_STATUS_WRITE],
        }
    }

    /// An authenticated user. Staff roles are recorded as operators.
    pub fn for_user(user_id: UserId, roles: Vec<Role>) -> Self {
        let actor = if roles.iter().any(Role::is_staff) {
            Actor::Operator(user_id)
        } else {
            Actor::Customer(user_id)
        };
        let permissions = permissions_for_roles(&roles);
        Self {
            actor,
            roles,
            permissions,
        }
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.actor.user_id()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn has(&self, required: &Permission) -> bool {
        authorize(self, required).is_ok()
    }

    pub fn require(&self, required: &Permission) -> Result<(), AuthzError> {
        authorize(self, required)
    }

    /// Owners pass unconditionally; everyone else needs `fallback`.
    pub fn require_owner_or(&self, owner: UserId, fallback: &Permission) -> Result<(), AuthzError> {
        if self.user_id() == Some(owner) {
            return Ok(());
        }
        match authorize(self, fallback) {
            Ok(()) => Ok(()),
            Err(_) => Err(AuthzError::NotOwner),
        }
    }
}

/// Pure policy check: no IO, no panics.
pub fn authorize(ctx: &AuthContext, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = ctx.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_become_operator_actor() {
        let user = UserId::new();
        let ctx = AuthContext::for_user(user, vec![Role::OPERATOR]);
        assert_eq!(ctx.actor(), Actor::Operator(user));

        let ctx = AuthContext::for_user(user, vec![Role::CUSTOMER]);
        assert_eq!(ctx.actor(), Actor::Customer(user));
    }

    #[test]
    fn customer_is_forbidden_from_operator_actions() {
        let ctx = AuthContext::for_user(UserId::new(), vec![Role::CUSTOMER]);
        let err = ctx.require(&Permission::JOBS_STATUS_WRITE).unwrap_err();
        match err {
            AuthzError::Forbidden(p) if p == "jobs.status.write" => {}
            _ => panic!("Expected Forbidden naming the permission"),
        }
    }

    #[test]
    fn owner_passes_without_permission() {
        let owner = UserId::new();
        let ctx = AuthContext::for_user(owner, vec![]);
        assert!(ctx.require_owner_or(owner, &Permission::ORDERS_READ_ANY).is_ok());

        let stranger = AuthContext::for_user(UserId::new(), vec![]);
        assert_eq!(
            stranger.require_owner_or(owner, &Permission::ORDERS_READ_ANY),
            Err(AuthzError::NotOwner)
        );
    }

    #[test]
    fn system_context_has_wildcard() {
        assert!(AuthContext::system().has(&Permission::ORDERS_OVERRIDE));
        assert!(!AuthContext::device_feed().has(&Permission::ORDERS_OVERRIDE));
    }
}
