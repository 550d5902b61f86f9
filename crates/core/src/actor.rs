//! Who caused a state change.

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Originator of a status mutation, recorded on every audit entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    /// The engine itself (cascades, payment signals, worker callbacks).
    System,
    /// Back-office staff acting through the admin surface.
    Operator(UserId),
    /// The customer who owns the order.
    Customer(UserId),
    /// A printer reporting through the device feed.
    DeviceFeed,
}

impl Actor {
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::System => "system",
            Actor::Operator(_) => "operator",
            Actor::Customer(_) => "customer",
            Actor::DeviceFeed => "device_feed",
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::Operator(id) | Actor::Customer(id) => Some(*id),
            Actor::System | Actor::DeviceFeed => None,
        }
    }

    /// Rebuild an actor from its persisted `(kind, user_id)` columns.
    pub fn from_parts(kind: &str, user_id: Option<UserId>) -> Option<Self> {
        match (kind, user_id) {
            ("system", _) => Some(Actor::System),
            ("device_feed", _) => Some(Actor::DeviceFeed),
            ("operator", Some(id)) => Some(Actor::Operator(id)),
            ("customer", Some(id)) => Some(Actor::Customer(id)),
            _ => None,
        }
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.user_id() {
            Some(id) => write!(f, "{}:{}", self.kind(), id),
            None => f.write_str(self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_round_trip_for_user_actors() {
        let user = UserId::new();
        let actor = Actor::Operator(user);
        assert_eq!(Actor::from_parts(actor.kind(), actor.user_id()), Some(actor));
    }

    #[test]
    fn user_actor_without_id_is_rejected() {
        assert_eq!(Actor::from_parts("customer", None), None);
    }
}
