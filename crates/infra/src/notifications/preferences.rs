//! Per-user channel preferences.
//!
//! Web is always on. Critical types go out on every channel they are
//! rendered for; everything else defaults to web only until the user opts in.

use std::sync::Arc;

use printforge_core::UserId;

use super::error::DispatchError;
use super::store::PreferenceStore;
use super::types::{Channel, NotificationType};

#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn allows(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool, DispatchError> {
        if channel == Channel::Web || notification_type.is_critical() {
            return Ok(true);
        }
        Ok(self
            .store
            .get_preference(user_id, notification_type, channel)?
            .unwrap_or(false))
    }

    pub fn set(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), DispatchError> {
        if !enabled && notification_type.is_critical() {
            return Err(DispatchError::CriticalPreference { notification_type });
        }
        if !enabled && channel == Channel::Web {
            return Err(DispatchError::Validation(
                "web notifications cannot be disabled".to_string(),
            ));
        }
        self.store
            .set_preference(user_id, notification_type, channel, enabled)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::store::InMemoryNotificationStore;

    fn prefs() -> Preferences {
        Preferences::new(Arc::new(InMemoryNotificationStore::new()))
    }

    #[test]
    fn non_critical_types_default_to_web_only() {
        let prefs = prefs();
        let user = UserId::new();
        assert!(prefs.allows(user, NotificationType::ProcessProgress, Channel::Web).unwrap());
        assert!(!prefs.allows(user, NotificationType::ProcessProgress, Channel::Push).unwrap());
        assert!(!prefs.allows(user, NotificationType::ProcessStatus, Channel::Email).unwrap());
    }

    #[test]
    fn opting_in_enables_a_channel() {
        let prefs = prefs();
        let user = UserId::new();
        prefs
            .set(user, NotificationType::ProcessProgress, Channel::Push, true)
            .unwrap();
        assert!(prefs.allows(user, NotificationType::ProcessProgress, Channel::Push).unwrap());
        assert!(!prefs.allows(UserId::new(), NotificationType::ProcessProgress, Channel::Push).unwrap());
    }

    #[test]
    fn critical_types_cannot_be_disabled() {
        let prefs = prefs();
        let err = prefs
            .set(UserId::new(), NotificationType::ProcessFailed, Channel::Email, false)
            .unwrap_err();
        match err {
            DispatchError::CriticalPreference { notification_type }
                if notification_type == NotificationType::ProcessFailed => {}
            _ => panic!("Expected CriticalPreference"),
        }
        assert!(prefs.allows(UserId::new(), NotificationType::ProcessCompleted, Channel::Email).unwrap());
    }

    #[test]
    fn web_cannot_be_disabled() {
        let err = prefs()
            .set(UserId::new(), NotificationType::ProcessStatus, Channel::Web, false)
            .unwrap_err();
        match err {
            DispatchError::Validation(_) => {}
            _ => panic!("Expected Validation"),
        }
    }
}
