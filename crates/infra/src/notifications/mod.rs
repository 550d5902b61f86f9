//! Customer notifications about orders and print jobs.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod postgres;
pub mod preferences;
mod render;
pub mod store;
pub mod types;

pub use channels::{ChannelSender, DeliveryError, LogSender};
pub use dispatcher::{
    Caller, ExpirationRequest, NotificationDispatcher, ProgressRequest, ResultsRequest,
    StatusChangeRequest,
};
pub use error::DispatchError;
pub use postgres::PostgresNotificationStore;
pub use store::{InMemoryNotificationStore, NotificationStore, PreferenceStore};
pub use types::{
    Channel, DeliveryRecord, Notification, NotificationFilter, NotificationPage,
    NotificationPriority, NotificationStatus, NotificationType, Pagination,
};
