//! Creates notifications about orders and print jobs and fans them out.
//!
//! Every call produces at most one [`Notification`] row. The same logical
//! event sent twice yields two rows; de-duplication is the caller's job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use printforge_auth::{ApiKeyVerifier, AuthContext, CsrfValidator};
use printforge_core::{NotificationId, UserId};

use super::channels::ChannelSender;
use super::error::DispatchError;
use super::preferences::Preferences;
use super::render::{self, Rendered};
use super::store::{NotificationStore, PreferenceStore};
use super::types::{
    Channel, DeliveryRecord, Notification, NotificationFilter, NotificationPage, NotificationStatus,
    NotificationType, Pagination,
};
use crate::audit::Subject;
use crate::config::DispatcherConfig;
use crate::gateway::tokens::{ProcessTokens, is_valid_process_token};
use crate::store::SyncStore;
use crate::sync::SyncEvent;

const MAX_STATUS_LEN: usize = 50;

/// Who is calling a `notify_*` operation.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    /// Internal worker presenting the shared API key.
    Worker { api_key: &'a str },
    /// The owning user, with an anti-forgery token.
    User {
        auth: &'a AuthContext,
        csrf_token: Option<&'a str>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeRequest {
    pub process_token: String,
    pub user_id: UserId,
    pub old_status: String,
    pub new_status: String,
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRequest {
    pub process_token: String,
    pub user_id: UserId,
    pub percent: u8,
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRequest {
    pub process_token: String,
    pub user_id: UserId,
    pub summary: Option<String>,
    pub download_url: Option<String>,
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpirationRequest {
    pub process_token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// The process a notification is about.
#[derive(Debug, Clone)]
struct Process {
    token: Option<String>,
    subject: Subject,
    status: String,
}

impl Process {
    fn url(&self) -> String {
        let handle = self
            .token
            .clone()
            .unwrap_or_else(|| self.subject.id().to_string());
        render::process_url(&self.subject, &handle)
    }
}

pub struct NotificationDispatcher {
    notifications: Arc<dyn NotificationStore>,
    preferences: Preferences,
    tokens: ProcessTokens,
    processes: Arc<dyn SyncStore>,
    api_keys: ApiKeyVerifier,
    csrf: Arc<dyn CsrfValidator>,
    senders: Vec<Arc<dyn ChannelSender>>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceStore>,
        tokens: ProcessTokens,
        processes: Arc<dyn SyncStore>,
        api_keys: ApiKeyVerifier,
        csrf: Arc<dyn CsrfValidator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            notifications,
            preferences: Preferences::new(preferences),
            tokens,
            processes,
            api_keys,
            csrf,
            senders: Vec::new(),
            config,
        }
    }

    /// Register the transport for a non-web channel.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.retain(|s| s.channel() != sender.channel());
        self.senders.push(sender);
        self
    }

    pub fn tokens(&self) -> &ProcessTokens {
        &self.tokens
    }

    pub fn notify_status_change(
        &self,
        caller: &Caller<'_>,
        request: StatusChangeRequest,
    ) -> Result<Notification, DispatchError> {
        let now = Utc::now();
        logged("notify_status_change", (|| -> Result<Notification, DispatchError> {
            validate_status("old_status", &request.old_status)?;
            validate_status("new_status", &request.new_status)?;
            let process = self.authorize(caller, &request.process_token, request.user_id, now)?;

            let rendered = render::status_change(
                &process.subject,
                &request.old_status,
                &request.new_status,
                &request.context,
                &self.config,
            );
            self.deliver(request.user_id, &process, rendered, request.context, now)
        })())
    }

    /// `Ok(None)` when `percent` is not near a configured milestone.
    pub fn notify_progress(
        &self,
        caller: &Caller<'_>,
        request: ProgressRequest,
    ) -> Result<Option<Notification>, DispatchError> {
        let now = Utc::now();
        logged("notify_progress", (|| -> Result<Option<Notification>, DispatchError> {
            if request.percent > 100 {
                return Err(DispatchError::Validation(format!(
                    "progress must be 0..=100, got {}",
                    request.percent
                )));
            }
            let process = self.authorize(caller, &request.process_token, request.user_id, now)?;

            let Some(rendered) = render::progress(&process.subject, request.percent, &self.config)
            else {
                debug!(percent = request.percent, "progress not near a milestone; skipped");
                return Ok(None);
            };
            self.deliver(request.user_id, &process, rendered, request.context, now)
                .map(Some)
        })())
    }

    pub fn notify_results_available(
        &self,
        caller: &Caller<'_>,
        request: ResultsRequest,
    ) -> Result<Notification, DispatchError> {
        let now = Utc::now();
        logged("notify_results_available", (|| -> Result<Notification, DispatchError> {
            let process = self.authorize(caller, &request.process_token, request.user_id, now)?;
            let rendered = render::results(
                &process.subject,
                request.summary.as_deref(),
                request.download_url.as_deref(),
                &self.config,
            );
            self.deliver(request.user_id, &process, rendered, request.context, now)
        })())
    }

    /// `Ok(None)` while expiry is further away than the warning window.
    pub fn notify_expiration_warning(
        &self,
        caller: &Caller<'_>,
        request: ExpirationRequest,
    ) -> Result<Option<Notification>, DispatchError> {
        let now = Utc::now();
        logged("notify_expiration_warning", (|| -> Result<Option<Notification>, DispatchError> {
            let process = self.authorize(caller, &request.process_token, request.user_id, now)?;
            let completed = process.status == "completed";
            let Some(rendered) = render::expiration(
                &process.subject,
                request.expires_at,
                now,
                completed,
                &self.config,
            ) else {
                debug!(expires_at = %request.expires_at, "expiry outside warning window; skipped");
                return Ok(None);
            };
            self.deliver(request.user_id, &process, rendered, BTreeMap::new(), now)
                .map(Some)
        })())
    }

    /// Turn a committed engine transition into a notification for the order's customer.
    pub fn handle_sync_event(&self, event: &SyncEvent) -> Result<Option<Notification>, DispatchError> {
        let now = Utc::now();
        let Some(user_id) = event.customer_id() else {
            debug!("sync event without a customer; nothing to notify");
            return Ok(None);
        };

        logged("handle_sync_event", (|| -> Result<Option<Notification>, DispatchError> {
            match event {
                SyncEvent::StatusChanged {
                    update,
                    failure_reason,
                    cancel_reason,
                    ..
                } => {
                    let process = self.process_for_event(update.subject, user_id, &update.new_status, now)?;
                    let mut context = BTreeMap::new();
                    if let Some(reason) = failure_reason {
                        context.insert("error_message".to_string(), json!(reason));
                    }
                    if let Some(reason) = cancel_reason {
                        context.insert("cancel_reason".to_string(), json!(reason));
                    }
                    let rendered = render::status_change(
                        &update.subject,
                        &update.old_status,
                        &update.new_status,
                        &context,
                        &self.config,
                    );
                    self.deliver(user_id, &process, rendered, context, now).map(Some)
                }
                SyncEvent::ProgressReported { job_id, progress, .. } => {
                    let subject = Subject::PrintJob(*job_id);
                    let Some(rendered) = render::progress(&subject, *progress, &self.config) else {
                        return Ok(None);
                    };
                    let process = self.process_for_event(subject, user_id, "printing", now)?;
                    self.deliver(user_id, &process, rendered, BTreeMap::new(), now)
                        .map(Some)
                }
            }
        })())
    }

    pub fn list_notifications(
        &self,
        auth: &AuthContext,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<NotificationPage, DispatchError> {
        let user_id = auth.user_id().ok_or(DispatchError::Unauthenticated)?;
        let (notifications, total) =
            self.notifications
                .list_notifications(user_id, filter, pagination)?;
        Ok(NotificationPage::new(notifications, total, pagination))
    }

    pub fn mark_read(&self, auth: &AuthContext, id: NotificationId) -> Result<Notification, DispatchError> {
        let user_id = auth.user_id().ok_or(DispatchError::Unauthenticated)?;
        let mut notification = self
            .notifications
            .get_notification(id)?
            .ok_or_else(|| DispatchError::NotFound(format!("notification {id}")))?;
        if notification.user_id != user_id {
            warn!(notification_id = %id, user_id = %user_id, "mark read on another user's notification");
            return Err(DispatchError::Forbidden("notification belongs to another user".to_string()));
        }
        let now = Utc::now();
        if self.notifications.mark_read(id, now)? {
            notification.mark_read(now);
        }
        Ok(notification)
    }

    /// Returns how many notifications were marked.
    pub fn mark_all_read(
        &self,
        auth: &AuthContext,
        process_token: Option<&str>,
    ) -> Result<u64, DispatchError> {
        let user_id = auth.user_id().ok_or(DispatchError::Unauthenticated)?;
        Ok(self
            .notifications
            .mark_all_read(user_id, process_token, Utc::now())?)
    }

    pub fn set_preference(
        &self,
        auth: &AuthContext,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), DispatchError> {
        let user_id = auth.user_id().ok_or(DispatchError::Unauthenticated)?;
        self.preferences
            .set(user_id, notification_type, channel, enabled)
    }

    pub fn deliveries(&self, id: NotificationId) -> Result<Vec<DeliveryRecord>, DispatchError> {
        Ok(self.notifications.deliveries_for(id)?)
    }

    fn verify_caller(
        &self,
        caller: &Caller<'_>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        match caller {
            Caller::Worker { api_key } => {
                if self.api_keys.verify(api_key) {
                    Ok(())
                } else {
                    Err(DispatchError::Unauthenticated)
                }
            }
            Caller::User { auth, csrf_token } => {
                let caller_id = auth.user_id().ok_or(DispatchError::Unauthenticated)?;
                self.csrf.validate(*csrf_token, caller_id, now)?;
                if caller_id != user_id {
                    return Err(DispatchError::Forbidden(
                        "cannot notify another user".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn authorize(
        &self,
        caller: &Caller<'_>,
        token: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Process, DispatchError> {
        self.verify_caller(caller, user_id, now)?;
        if !is_valid_process_token(token) {
            return Err(DispatchError::InvalidToken);
        }
        let record = self
            .tokens
            .resolve(token)?
            .ok_or_else(|| DispatchError::NotFound("process".to_string()))?;
        if record.user_id != user_id {
            return Err(DispatchError::Forbidden(
                "process belongs to another user".to_string(),
            ));
        }
        let status = self.subject_status(record.subject)?;
        Ok(Process {
            token: Some(record.token),
            subject: record.subject,
            status,
        })
    }

    fn process_for_event(
        &self,
        subject: Subject,
        user_id: UserId,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<Process, DispatchError> {
        let token = self
            .tokens
            .current_for(subject, now)?
            .filter(|t| t.user_id == user_id)
            .map(|t| t.token);
        Ok(Process {
            token,
            subject,
            status: status.to_string(),
        })
    }

    fn subject_status(&self, subject: Subject) -> Result<String, DispatchError> {
        let status = match subject {
            Subject::Order(id) => self.processes.get_order(id)?.map(|o| o.status().to_string()),
            Subject::PrintJob(id) => self.processes.get_job(id)?.map(|j| j.status().to_string()),
        };
        status.ok_or_else(|| DispatchError::NotFound(format!("{} {}", subject.kind(), subject.id())))
    }

    fn deliver(
        &self,
        user_id: UserId,
        process: &Process,
        rendered: Rendered,
        caller_context: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Notification, DispatchError> {
        let mut context = caller_context;
        context.extend(rendered.context);
        context.insert("priority".to_string(), json!(rendered.priority.as_str()));
        context.insert("url".to_string(), json!(process.url()));
        if let Some(token) = &process.token {
            context.insert("process_token".to_string(), json!(token));
        }

        let notification = Notification {
            id: NotificationId::new(),
            user_id,
            notification_type: rendered.notification_type,
            title: rendered.title,
            message: rendered.message,
            context,
            process_token: process.token.clone(),
            status: NotificationStatus::Unread,
            created_at: now,
            read_at: None,
        };
        self.notifications.insert_notification(notification.clone())?;

        for channel in rendered.channels {
            if !self
                .preferences
                .allows(user_id, notification.notification_type, channel)?
            {
                debug!(channel = %channel, notification_type = %notification.notification_type, "channel disabled by preference");
                continue;
            }
            self.send(&notification, channel, now);
        }

        info!(
            notification_id = %notification.id,
            user_id = %user_id,
            notification_type = %notification.notification_type,
            subject = process.subject.kind(),
            "notification created"
        );
        Ok(notification)
    }

    /// Attempt one channel and log the attempt. Failures never fail the call.
    fn send(&self, notification: &Notification, channel: Channel, now: DateTime<Utc>) {
        let result = if channel == Channel::Web {
            Ok(())
        } else {
            match self.senders.iter().find(|s| s.channel() == channel) {
                Some(sender) => sender.send(notification).map_err(|e| e.to_string()),
                None => Err(format!("no {channel} transport configured")),
            }
        };

        if let Err(e) = &result {
            warn!(
                notification_id = %notification.id,
                channel = %channel,
                error = %e,
                "notification delivery failed"
            );
        }

        let record = DeliveryRecord {
            notification_id: notification.id,
            user_id: notification.user_id,
            process_token: notification.process_token.clone(),
            channel,
            delivered: result.is_ok(),
            error: result.err(),
            attempted_at: now,
        };
        if let Err(e) = self.notifications.record_delivery(record) {
            warn!(notification_id = %notification.id, error = %e, "failed to record delivery attempt");
        }
    }
}

fn validate_status(field: &'static str, value: &str) -> Result<(), DispatchError> {
    if value.trim().is_empty() {
        return Err(DispatchError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_STATUS_LEN {
        return Err(DispatchError::Validation(format!(
            "{field} must be at most {MAX_STATUS_LEN} characters"
        )));
    }
    Ok(())
}

fn logged<T>(operation: &'static str, result: Result<T, DispatchError>) -> Result<T, DispatchError> {
    if let Err(e) = &result {
        if e.is_rejection() {
            warn!(operation, error = %e, "notification request rejected");
        } else {
            error!(operation, error = %e, "notification dispatch failed");
        }
    }
    result
}
