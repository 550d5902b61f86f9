//! Postgres-backed notifications, delivery log and preferences.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use printforge_core::{NotificationId, UserId};

use super::store::{NotificationStore, PreferenceStore};
use super::types::{
    Channel, DeliveryRecord, Notification, NotificationFilter, NotificationStatus,
    NotificationType, Pagination,
};
use crate::store::StoreError;
use crate::store::postgres::{block_on, encode_snapshot, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresNotificationStore {
    pool: Arc<PgPool>,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, n), fields(notification_id = %n.id), err)]
    pub async fn insert(&self, n: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, notification_type, title, message, context, process_token, status, created_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(n.id.as_uuid())
        .bind(n.user_id.as_uuid())
        .bind(n.notification_type.as_str())
        .bind(&n.title)
        .bind(&n.message)
        .bind(encode_snapshot(&n.context)?)
        .bind(n.process_token.as_deref())
        .bind(n.status.as_str())
        .bind(n.created_at)
        .bind(n.read_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("insert_notification", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn load(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("get_notification", e))?;
        row.as_ref().map(decode_notification).transpose()
    }

    #[instrument(skip(self, filter), err)]
    pub async fn page(
        &self,
        user_id: UserId,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Notification>, u64), StoreError> {
        fn push_filter<'a>(
            qb: &mut QueryBuilder<'a, Postgres>,
            user_id: UserId,
            filter: &'a NotificationFilter,
        ) {
            qb.push(" WHERE user_id = ").push_bind(*user_id.as_uuid());
            if let Some(t) = filter.notification_type {
                qb.push(" AND notification_type = ").push_bind(t.as_str());
            }
            if let Some(token) = &filter.process_token {
                qb.push(" AND process_token = ").push_bind(token.as_str());
            }
            if filter.unread_only {
                qb.push(" AND status = 'unread'");
            }
        }

        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM notifications");
        push_filter(&mut count, user_id, filter);
        let total: i64 = count
            .build()
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("count_notifications", e))?
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;

        let mut list = QueryBuilder::new("SELECT * FROM notifications");
        push_filter(&mut list, user_id, filter);
        list.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);
        let rows = list
            .build()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("list_notifications", e))?;

        let notifications = rows.iter().map(decode_notification).collect::<Result<_, _>>()?;
        Ok((notifications, total.max(0) as u64))
    }

    #[instrument(skip(self), err)]
    pub async fn set_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.load(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("notification {id}")));
        }
        let result = sqlx::query(
            "UPDATE notifications SET status = 'read', read_at = $2 WHERE id = $1 AND status = 'unread'",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("mark_read", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn set_all_read(
        &self,
        user_id: UserId,
        process_token: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'read', read_at = $3
            WHERE user_id = $1 AND status = 'unread' AND ($2::TEXT IS NULL OR process_token = $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(process_token)
        .bind(at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("mark_all_read", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, record), fields(channel = %record.channel), err)]
    pub async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_deliveries
                (notification_id, user_id, process_token, channel, delivered, error, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.notification_id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.process_token.as_deref())
        .bind(record.channel.as_str())
        .bind(record.delivered)
        .bind(record.error.as_deref())
        .bind(record.attempted_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("record_delivery", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn load_deliveries(&self, id: NotificationId) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM notification_deliveries WHERE notification_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("deliveries_for", e))?;
        rows.iter().map(decode_delivery).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query(
            "SELECT enabled FROM notification_preferences WHERE user_id = $1 AND notification_type = $2 AND channel = $3",
        )
        .bind(user_id.as_uuid())
        .bind(notification_type.as_str())
        .bind(channel.as_str())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("get_preference", e))?;
        row.map(|r| r.try_get::<bool, _>("enabled"))
            .transpose()
            .map_err(|e| StoreError::Backend(format!("failed to read preference: {e}")))
    }

    #[instrument(skip(self), err)]
    pub async fn upsert_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, notification_type, channel, enabled, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, notification_type, channel)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(notification_type.as_str())
        .bind(channel.as_str())
        .bind(enabled)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("set_preference", e))?;
        Ok(())
    }
}

fn decode_notification(row: &sqlx::postgres::PgRow) -> Result<Notification, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read notification: {e}"));

    let id: Uuid = row.try_get("id").map_err(read)?;
    let user_id: Uuid = row.try_get("user_id").map_err(read)?;
    let notification_type: String = row.try_get("notification_type").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let context: serde_json::Value = row.try_get("context").map_err(read)?;
    let context: BTreeMap<String, serde_json::Value> = serde_json::from_value(context)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize context: {e}")))?;

    Ok(Notification {
        id: NotificationId::from_uuid(id),
        user_id: UserId::from_uuid(user_id),
        notification_type: notification_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("{e}")))?,
        title: row.try_get("title").map_err(read)?,
        message: row.try_get("message").map_err(read)?,
        context,
        process_token: row.try_get("process_token").map_err(read)?,
        status: match status.as_str() {
            "read" => NotificationStatus::Read,
            _ => NotificationStatus::Unread,
        },
        created_at: row.try_get("created_at").map_err(read)?,
        read_at: row.try_get("read_at").map_err(read)?,
    })
}

fn decode_delivery(row: &sqlx::postgres::PgRow) -> Result<DeliveryRecord, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read delivery: {e}"));

    let notification_id: Uuid = row.try_get("notification_id").map_err(read)?;
    let user_id: Uuid = row.try_get("user_id").map_err(read)?;
    let channel: String = row.try_get("channel").map_err(read)?;

    Ok(DeliveryRecord {
        notification_id: NotificationId::from_uuid(notification_id),
        user_id: UserId::from_uuid(user_id),
        process_token: row.try_get("process_token").map_err(read)?,
        channel: channel
            .parse()
            .map_err(|e| StoreError::Backend(format!("{e}")))?,
        delivered: row.try_get("delivered").map_err(read)?,
        error: row.try_get("error").map_err(read)?,
        attempted_at: row.try_get("attempted_at").map_err(read)?,
    })
}

impl NotificationStore for PostgresNotificationStore {
    fn insert_notification(&self, notification: Notification) -> Result<(), StoreError> {
        block_on(self.insert(&notification))?
    }

    fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        block_on(self.load(id))?
    }

    fn list_notifications(
        &self,
        user_id: UserId,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Notification>, u64), StoreError> {
        block_on(self.page(user_id, filter, pagination))?
    }

    fn mark_read(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        block_on(self.set_read(id, at))?
    }

    fn mark_all_read(
        &self,
        user_id: UserId,
        process_token: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        block_on(self.set_all_read(user_id, process_token, at))?
    }

    fn record_delivery(&self, record: DeliveryRecord) -> Result<(), StoreError> {
        block_on(self.insert_delivery(&record))?
    }

    fn deliveries_for(&self, id: NotificationId) -> Result<Vec<DeliveryRecord>, StoreError> {
        block_on(self.load_deliveries(id))?
    }
}

impl PreferenceStore for PostgresNotificationStore {
    fn get_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<bool>, StoreError> {
        block_on(self.load_preference(user_id, notification_type, channel))?
    }

    fn set_preference(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        block_on(self.upsert_preference(user_id, notification_type, channel, enabled))?
    }
}
