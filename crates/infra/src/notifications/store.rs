use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use printforge_core::{NotificationId, UserId};

use super::types::{
    Channel, DeliveryRecord, Notification, NotificationFilter, NotificationType, Pagination,
};
use crate::store::StoreError;

pub trait NotificationStore: Send + Sync {
    fn insert_notification(&self, notification: Notification) -> Result<(), StoreError>;

    fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// One page of a user's notifications, newest first, plus the filtered total.
    fn list_notifications(
        &self,
        user_id: UserId,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Notification>, u64), StoreError>;

    /// Returns `false` if the notification was already read.
    fn mark_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Marks every unread notification of `user_id` (optionally one process). Returns the count.
    fn mark_all_read(
        &self,
        user_id: UserId,
        process_token: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StoreError>;

    fn deliveries_for(&self, id: NotificationId) -> Result<Vec<DeliveryRecord>, StoreError>;
}

pub trait PreferenceStore: Send + Sync {
    fn get_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError>;

    fn set_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    notifications: HashMap<NotificationId, Notification>,
    deliveries: Vec<DeliveryRecord>,
    preferences: HashMap<(UserId, NotificationType, Channel), bool>,
}

/// In-memory notifications, delivery log and preferences (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    tables: RwLock<Tables>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Number of stored notifications (tests).
    pub fn notification_count(&self) -> usize {
        self.read().map(|t| t.notifications.len()).unwrap_or(0)
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn insert_notification(&self, notification: Notification) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.notifications.contains_key(&notification.id) {
            return Err(StoreError::Conflict(format!(
                "notification {} already exists",
                notification.id
            )));
        }
        tables.notifications.insert(notification.id, notification);
        Ok(())
    }

    fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        Ok(self.read()?.notifications.get(&id).cloned())
    }

    fn list_notifications(
        &self,
        user_id: UserId,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Notification>, u64), StoreError> {
        let tables = self.read()?;
        let mut matching: Vec<&Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && filter.matches(n))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    fn mark_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let n = tables
            .notifications
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;
        Ok(n.mark_read(at))
    }

    fn mark_all_read(
        &self,
        user_id: UserId,
        process_token: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut count = 0;
        for n in tables.notifications.values_mut() {
            if n.user_id != user_id {
                continue;
            }
            if process_token.is_some() && process_token != n.process_token.as_deref() {
                continue;
            }
            if n.mark_read(at) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StoreError> {
        self.write()?.deliveries.push(record);
        Ok(())
    }

    fn deliveries_for(&self, id: NotificationId) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self
            .read()?
            .deliveries
            .iter()
            .filter(|d| d.notification_id == id)
            .cloned()
            .collect())
    }
}

impl PreferenceStore for InMemoryNotificationStore {
    fn get_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .read()?
            .preferences
            .get(&(user_id, notification_type, channel))
            .copied())
    }

    fn set_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.write()?
            .preferences
            .insert((user_id, notification_type, channel), enabled);
        Ok(())
    }
}
