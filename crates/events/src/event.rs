use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are immutable facts. Every order and print job state change is
/// expressed as one or more events before the resulting snapshot is stored.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "printing.job.status_changed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
