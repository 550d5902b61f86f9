//! Titles, messages, priority and candidate channels per notification kind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::types::{Channel, NotificationPriority, NotificationType};
use crate::audit::Subject;
use crate::config::DispatcherConfig;

pub const MAX_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rendered {
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    /// Candidates before preferences are applied. Web is always first.
    pub channels: Vec<Channel>,
    pub context: BTreeMap<String, Value>,
}

/// Human name of the process a notification is about.
pub(crate) fn label(subject: &Subject) -> &'static str {
    match subject {
        Subject::Order(_) => "order",
        Subject::PrintJob(_) => "print job",
    }
}

/// Customer-facing detail page; `handle` is the process token when one exists.
pub(crate) fn process_url(subject: &Subject, handle: &str) -> String {
    match subject {
        Subject::Order(_) => format!("/customer/orders/{handle}/details"),
        Subject::PrintJob(_) => format!("/customer/print-jobs/{handle}/details"),
    }
}

fn context_str<'a>(context: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    context
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub(crate) fn status_change(
    subject: &Subject,
    old_status: &str,
    new_status: &str,
    context: &BTreeMap<String, Value>,
    config: &DispatcherConfig,
) -> Rendered {
    let label = label(subject);
    let priority = NotificationPriority::for_status(new_status);
    let finished = matches!(new_status, "completed" | "failed");

    let title = match new_status {
        "pending" | "queued" => "Process Started",
        "processing" | "preparing" | "printing" | "post-processing" | "in_production" => {
            "Processing"
        }
        "completed" => "Process Completed",
        "failed" => "Process Failed",
        "cancelled" => "Process Cancelled",
        _ => "Status Update",
    };

    let message = match new_status {
        "completed" => format!("Your {label} has completed."),
        "failed" => match context_str(context, "error_message") {
            Some(reason) => format!("Your {label} failed: {reason}"),
            None => format!("Your {label} failed."),
        },
        "cancelled" => match context_str(context, "cancel_reason") {
            Some(reason) => format!("Your {label} was cancelled: {reason}"),
            None => format!("Your {label} was cancelled."),
        },
        _ => format!("Your {label} moved from {old_status} to {new_status}."),
    };

    let mut channels = vec![Channel::Web];
    if priority == NotificationPriority::High || finished {
        channels.push(Channel::Push);
    }
    if finished && config.send_email_notifications {
        channels.push(Channel::Email);
    }

    Rendered {
        notification_type: NotificationType::for_status(new_status),
        priority,
        title: title.to_string(),
        message,
        channels,
        context: BTreeMap::from([
            ("old_status".to_string(), json!(old_status)),
            ("new_status".to_string(), json!(new_status)),
        ]),
    }
}

/// The milestone `percent` is within `margin` of, if any.
pub(crate) fn near_milestone(percent: u8, config: &DispatcherConfig) -> Option<u8> {
    config
        .progress_milestones
        .iter()
        .copied()
        .find(|m| percent.abs_diff(*m) <= config.milestone_margin)
}

/// `None` when `percent` is not near a milestone.
pub(crate) fn progress(subject: &Subject, percent: u8, config: &DispatcherConfig) -> Option<Rendered> {
    let milestone = near_milestone(percent, config)?;

    let mut channels = vec![Channel::Web];
    if percent >= 75 && config.push_on_high_progress {
        channels.push(Channel::Push);
    }

    Some(Rendered {
        notification_type: NotificationType::ProcessProgress,
        priority: NotificationPriority::Low,
        title: "Progress".to_string(),
        message: format!("Your {} has reached {percent}%.", label(subject)),
        channels,
        context: BTreeMap::from([
            ("progress".to_string(), json!(percent)),
            ("milestone".to_string(), json!(milestone)),
        ]),
    })
}

pub(crate) fn results(
    subject: &Subject,
    summary: Option<&str>,
    download_url: Option<&str>,
    config: &DispatcherConfig,
) -> Rendered {
    let summary: Option<String> = summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_SUMMARY_CHARS).collect());

    let mut message = format!("Results for your {} are ready.", label(subject));
    if let Some(s) = &summary {
        message.push(' ');
        message.push_str(s);
    }

    let mut channels = vec![Channel::Web, Channel::Push];
    if config.email_with_results {
        channels.push(Channel::Email);
    }

    let mut context = BTreeMap::new();
    if let Some(s) = summary {
        context.insert("summary".to_string(), json!(s));
    }
    if let Some(url) = download_url {
        context.insert("download_url".to_string(), json!(url));
    }

    Rendered {
        notification_type: NotificationType::ProcessResults,
        priority: NotificationPriority::High,
        title: "Results Available".to_string(),
        message,
        channels,
        context,
    }
}

/// `None` while more than the warning window remains.
pub(crate) fn expiration(
    subject: &Subject,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    process_completed: bool,
    config: &DispatcherConfig,
) -> Option<Rendered> {
    let remaining = expires_at - now;
    if remaining > config.expiration_warning_window {
        return None;
    }
    let hours = remaining.num_hours().max(0);
    let label = label(subject);

    let message = if process_completed {
        format!("Your {label} results expire in {hours} hours. Download them before they expire.")
    } else {
        format!("Your {label} expires in {hours} hours.")
    };

    Some(Rendered {
        notification_type: NotificationType::ProcessExpiration,
        priority: NotificationPriority::Medium,
        title: "Expiration Warning".to_string(),
        message,
        channels: vec![Channel::Web, Channel::Push],
        context: BTreeMap::from([
            ("expires_at".to_string(), json!(expires_at.to_rfc3339())),
            ("hours_remaining".to_string(), json!(hours)),
        ]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use printforge_core::{OrderId, PrintJobId};

    fn job() -> Subject {
        Subject::PrintJob(PrintJobId::new())
    }

    #[test]
    fn failed_status_uses_error_message_and_all_channels() {
        let ctx = BTreeMap::from([("error_message".to_string(), json!("nozzle clog"))]);
        let r = status_change(&job(), "printing", "failed", &ctx, &DispatcherConfig::default());
        assert_eq!(r.title, "Process Failed");
        assert_eq!(r.message, "Your print job failed: nozzle clog");
        assert_eq!(r.priority, NotificationPriority::High);
        assert_eq!(r.channels, vec![Channel::Web, Channel::Push, Channel::Email]);
        assert_eq!(r.notification_type, NotificationType::ProcessFailed);
    }

    #[test]
    fn routine_status_is_web_only() {
        let order = Subject::Order(OrderId::new());
        let r = status_change(&order, "pending", "processing", &BTreeMap::new(), &DispatcherConfig::default());
        assert_eq!(r.title, "Processing");
        assert_eq!(r.priority, NotificationPriority::Medium);
        assert_eq!(r.channels, vec![Channel::Web]);
        assert_eq!(r.message, "Your order moved from pending to processing.");
    }

    #[test]
    fn progress_only_near_milestones() {
        let cfg = DispatcherConfig::default();
        assert!(progress(&job(), 10, &cfg).is_none());
        assert!(progress(&job(), 60, &cfg).is_none());
        let r = progress(&job(), 49, &cfg).unwrap();
        assert_eq!(r.context["milestone"], json!(50));
        assert_eq!(r.channels, vec![Channel::Web]);
        let high = progress(&job(), 77, &cfg).unwrap();
        assert_eq!(high.channels, vec![Channel::Web, Channel::Push]);
    }

    #[test]
    fn results_summary_is_truncated() {
        let long = "x".repeat(500);
        let r = results(&job(), Some(&long), Some("/downloads/t"), &DispatcherConfig::default());
        assert_eq!(r.context["summary"].as_str().unwrap().len(), MAX_SUMMARY_CHARS);
        assert_eq!(r.context["download_url"], json!("/downloads/t"));
        assert_eq!(r.priority, NotificationPriority::High);
    }

    #[test]
    fn expiration_warns_only_inside_the_window() {
        let cfg = DispatcherConfig::default();
        let now = Utc::now();
        assert!(expiration(&job(), now + Duration::hours(30), now, false, &cfg).is_none());

        let r = expiration(&job(), now + Duration::hours(5), now, true, &cfg).unwrap();
        assert_eq!(r.context["hours_remaining"], json!(5));
        assert!(r.message.contains("before they expire"));
    }

    #[test]
    fn urls_depend_on_process_kind() {
        assert_eq!(process_url(&job(), "tok"), "/customer/print-jobs/tok/details");
        assert_eq!(
            process_url(&Subject::Order(OrderId::new()), "tok"),
            "/customer/orders/tok/details"
        );
    }
}
