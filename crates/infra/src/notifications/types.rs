use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printforge_core::{DomainError, NotificationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ProcessStatus,
    ProcessProgress,
    ProcessCompleted,
    ProcessFailed,
    ProcessResults,
    ProcessExpiration,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::ProcessStatus,
        NotificationType::ProcessProgress,
        NotificationType::ProcessCompleted,
        NotificationType::ProcessFailed,
        NotificationType::ProcessResults,
        NotificationType::ProcessExpiration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ProcessStatus => "process_status",
            NotificationType::ProcessProgress => "process_progress",
            NotificationType::ProcessCompleted => "process_completed",
            NotificationType::ProcessFailed => "process_failed",
            NotificationType::ProcessResults => "process_results",
            NotificationType::ProcessExpiration => "process_expiration",
        }
    }

    /// Critical types are delivered on every channel regardless of preferences.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            NotificationType::ProcessCompleted
                | NotificationType::ProcessFailed
                | NotificationType::ProcessResults
        )
    }

    /// Type of a status notification, keyed on the new status.
    pub fn for_status(new_status: &str) -> Self {
        match new_status {
            "completed" => NotificationType::ProcessCompleted,
            "failed" => NotificationType::ProcessFailed,
            _ => NotificationType::ProcessStatus,
        }
    }
}

impl core::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for NotificationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown notification type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// In-app; always delivered.
    Web,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Web, Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Channel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown channel '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Medium => "medium",
            NotificationPriority::High => "high",
        }
    }

    pub fn for_status(new_status: &str) -> Self {
        match new_status {
            "completed" | "failed" => NotificationPriority::High,
            "processing" | "cancelled" => NotificationPriority::Medium,
            _ => NotificationPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }
}

/// A persisted, user-facing message about a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    /// Rendering context: caller-supplied keys plus `url`, `priority`, `process_token`.
    pub context: BTreeMap<String, serde_json::Value>,
    pub process_token: Option<String>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.status == NotificationStatus::Unread
    }

    /// Returns `false` if it was already read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == NotificationStatus::Read {
            return false;
        }
        self.status = NotificationStatus::Read;
        self.read_at = Some(at);
        true
    }
}

/// One channel attempt for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub notification_id: NotificationId,
    pub user_id: UserId,
    pub process_token: Option<String>,
    pub channel: Channel,
    pub delivered: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub notification_type: Option<NotificationType>,
    pub process_token: Option<String>,
    pub unread_only: bool,
}

impl NotificationFilter {
    pub fn matches(&self, n: &Notification) -> bool {
        if self.notification_type.is_some_and(|t| t != n.notification_type) {
            return false;
        }
        if self.process_token.is_some() && self.process_token != n.process_token {
            return false;
        }
        !self.unread_only || n.is_unread()
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Missing values take defaults; `limit` is clamped to `1..=50`, `page` to `>= 1`.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl NotificationPage {
    pub fn new(notifications: Vec<Notification>, total: u64, pagination: Pagination) -> Self {
        Self {
            notifications,
            total,
            page: pagination.page,
            limit: pagination.limit,
            pages: total.div_ceil(u64::from(pagination.limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        assert_eq!(Pagination::new(None, None), Pagination { page: 1, limit: 10 });
        assert_eq!(Pagination::new(Some(0), Some(0)), Pagination { page: 1, limit: 1 });
        assert_eq!(Pagination::new(Some(3), Some(500)), Pagination { page: 3, limit: 50 });
        assert_eq!(Pagination::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn page_count_rounds_up() {
        let page = NotificationPage::new(Vec::new(), 21, Pagination::new(None, Some(10)));
        assert_eq!(page.pages, 3);
        let empty = NotificationPage::new(Vec::new(), 0, Pagination::default());
        assert_eq!(empty.pages, 0);
    }

    #[test]
    fn status_priority_and_type() {
        assert_eq!(NotificationPriority::for_status("failed"), NotificationPriority::High);
        assert_eq!(NotificationPriority::for_status("cancelled"), NotificationPriority::Medium);
        assert_eq!(NotificationPriority::for_status("printing"), NotificationPriority::Low);
        assert_eq!(NotificationType::for_status("completed"), NotificationType::ProcessCompleted);
        assert!(NotificationType::ProcessResults.is_critical());
        assert!(!NotificationType::ProcessProgress.is_critical());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = "process_magic".parse::<NotificationType>().unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("process_magic") => {}
            _ => panic!("Expected a validation error naming the type"),
        }
    }
}
