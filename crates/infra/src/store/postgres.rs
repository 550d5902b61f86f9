//! Postgres-backed stores.
//!
//! Entities are persisted as `jsonb` snapshots next to the columns used for
//! indexing and locking (status, foreign keys, `version`).
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | StoreError |
//! |------------|---------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / other | n/a | `Backend` |
//!
//! The store traits are synchronous. Calls must come from a thread that can
//! block on the tokio runtime (the API runs engine calls in
//! `spawn_blocking`).

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use printforge_core::{Actor, AggregateRoot, ExpectedVersion, OrderId, PrintJobId, PrinterId, UserId};
use printforge_orders::Order;
use printforge_printing::{PrintJob, Printer};

use super::{
    ChangeSet, JobFilter, OrderStore, PrintJobStore, PrinterStore, StatusUpdateLog, StoreError,
    SyncStore,
};
use crate::audit::{StatusUpdate, Subject};

/// Schema for every Postgres-backed store in this crate.
pub const MIGRATION: &str = include_str!("../../migrations/0001_printforge.sql");

/// Apply the schema (idempotent).
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATION)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresSyncStore {
    pool: Arc<PgPool>,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_order", e))?;
        row.map(|r| decode_snapshot(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn number_exists(&self, number: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM orders WHERE number = $1) AS taken")
            .bind(number)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("number_exists", e))?;
        row.try_get("taken")
            .map_err(|e| StoreError::Backend(format!("failed to read taken: {e}")))
    }

    #[instrument(skip(self), err)]
    pub async fn load_job(&self, id: PrintJobId) -> Result<Option<PrintJob>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM print_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_job", e))?;
        row.map(|r| decode_snapshot(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_jobs_for_order(&self, order_id: OrderId) -> Result<Vec<PrintJob>, StoreError> {
        let rows = sqlx::query(
            "SELECT snapshot FROM print_jobs WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_jobs_for_order", e))?;
        rows.iter().map(decode_snapshot).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn query_jobs(&self, filter: &JobFilter) -> Result<Vec<PrintJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot
            FROM print_jobs
            WHERE ($1::text IS NULL OR status = $1)
                AND ($2::uuid IS NULL OR order_id = $2)
                AND ($3::uuid IS NULL OR printer_id = $3)
                AND ($4 OR (status NOT IN ('completed', 'failed', 'cancelled') AND NOT superseded))
            ORDER BY priority ASC, created_at ASC, id ASC
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.order_id.map(|id| *id.as_uuid()))
        .bind(filter.printer_id.map(|id| *id.as_uuid()))
        .bind(filter.include_finished)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_jobs", e))?;
        rows.iter().map(decode_snapshot).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_printer(&self, id: PrinterId) -> Result<Option<Printer>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM printers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_printer", e))?;
        row.map(|r| decode_snapshot(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_printers(&self) -> Result<Vec<Printer>, StoreError> {
        let rows = sqlx::query("SELECT snapshot FROM printers ORDER BY id ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_printers", e))?;
        rows.iter().map(decode_snapshot).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_updates_for_order(&self, order_id: OrderId) -> Result<Vec<StatusUpdate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_type, subject_id, order_id, old_status, new_status,
                   actor_kind, actor_user_id, occurred_at
            FROM status_updates
            WHERE order_id = $1
            ORDER BY occurred_at ASC, seq ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_updates_for_order", e))?;
        rows.iter().map(decode_update).collect()
    }

    /// One transaction per change set: lock touched rows, check versions,
    /// upsert snapshots, append audit rows.
    #[instrument(
        skip(self, changes),
        fields(
            orders = changes.orders.len(),
            jobs = changes.jobs.len(),
            printers = changes.printers.len(),
            updates = changes.updates.len()
        ),
        err
    )]
    pub async fn commit_changes(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for w in &changes.orders {
            let order = &w.entity;
            lock_and_check(&mut tx, "orders", *order.id_typed().as_uuid(), w.expected).await?;
            sqlx::query(
                r#"
                INSERT INTO orders (id, number, customer_id, status, payment_status, version, snapshot, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    payment_status = EXCLUDED.payment_status,
                    version = EXCLUDED.version,
                    snapshot = EXCLUDED.snapshot,
                    updated_at = NOW()
                "#,
            )
            .bind(order.id_typed().as_uuid())
            .bind(order.number())
            .bind(order.customer_id().map(|id| *id.as_uuid()))
            .bind(order.status().as_str())
            .bind(order.payment_status().as_str())
            .bind(order.version() as i64)
            .bind(encode_snapshot(order)?)
            .bind(order.created_at().unwrap_or_else(Utc::now))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_order", e))?;
        }

        for w in &changes.jobs {
            let job = &w.entity;
            lock_and_check(&mut tx, "print_jobs", *job.id_typed().as_uuid(), w.expected).await?;
            sqlx::query(
                r#"
                INSERT INTO print_jobs (id, order_id, printer_id, status, priority, superseded, version, snapshot, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    printer_id = EXCLUDED.printer_id,
                    status = EXCLUDED.status,
                    priority = EXCLUDED.priority,
                    superseded = EXCLUDED.superseded,
                    version = EXCLUDED.version,
                    snapshot = EXCLUDED.snapshot,
                    updated_at = NOW()
                "#,
            )
            .bind(job.id_typed().as_uuid())
            .bind(job.order_id().map(|id| *id.as_uuid()))
            .bind(job.printer_id().map(|id| *id.as_uuid()))
            .bind(job.status().as_str())
            .bind(job.priority() as i16)
            .bind(job.is_superseded())
            .bind(job.version() as i64)
            .bind(encode_snapshot(job)?)
            .bind(job.created_at().unwrap_or_else(Utc::now))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_print_job", e))?;
        }

        for w in &changes.printers {
            let printer = &w.entity;
            lock_and_check(&mut tx, "printers", *printer.id_typed().as_uuid(), w.expected).await?;
            sqlx::query(
                r#"
                INSERT INTO printers (id, name, status, current_job_id, version, snapshot, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    status = EXCLUDED.status,
                    current_job_id = EXCLUDED.current_job_id,
                    version = EXCLUDED.version,
                    snapshot = EXCLUDED.snapshot,
                    updated_at = NOW()
                "#,
            )
            .bind(printer.id_typed().as_uuid())
            .bind(printer.name())
            .bind(printer.status().as_str())
            .bind(printer.current_job().map(|id| *id.as_uuid()))
            .bind(printer.version() as i64)
            .bind(encode_snapshot(printer)?)
            .bind(printer.created_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_printer", e))?;
        }

        for u in &changes.updates {
            sqlx::query(
                r#"
                INSERT INTO status_updates (
                    id, subject_type, subject_id, order_id, old_status, new_status,
                    actor_kind, actor_user_id, occurred_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(u.id)
            .bind(u.subject.kind())
            .bind(u.subject.id())
            .bind(u.order_id.as_uuid())
            .bind(&u.old_status)
            .bind(&u.new_status)
            .bind(u.actor.kind())
            .bind(u.actor.user_id().map(|id| *id.as_uuid()))
            .bind(u.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_status_update", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

/// `SELECT … FOR UPDATE` the row and compare its version with the expectation.
async fn lock_and_check(
    tx: &mut Transaction<'_, Postgres>,
    table: &'static str,
    id: Uuid,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let sql = format!("SELECT version FROM {table} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_row", e))?;

    let actual = match row {
        Some(r) => {
            let v: i64 = r
                .try_get("version")
                .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))?;
            Some(v as u64)
        }
        None => None,
    };

    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{table} {id}: expected {expected:?}, found {actual:?}"
        )))
    }
}

pub(crate) fn encode_snapshot<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("snapshot serialization failed: {e}")))
}

fn decode_snapshot<T: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T, StoreError> {
    let value: serde_json::Value = row
        .try_get("snapshot")
        .map_err(|e| StoreError::Backend(format!("failed to read snapshot: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize snapshot: {e}")))
}

fn decode_update(row: &sqlx::postgres::PgRow) -> Result<StatusUpdate, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read status update: {e}"));

    let subject_type: String = row.try_get("subject_type").map_err(read)?;
    let subject_id: Uuid = row.try_get("subject_id").map_err(read)?;
    let subject = match subject_type.as_str() {
        "order" => Subject::Order(OrderId::from_uuid(subject_id)),
        "print_job" => Subject::PrintJob(PrintJobId::from_uuid(subject_id)),
        other => return Err(StoreError::Backend(format!("unknown subject type '{other}'"))),
    };

    let actor_kind: String = row.try_get("actor_kind").map_err(read)?;
    let actor_user: Option<Uuid> = row.try_get("actor_user_id").map_err(read)?;
    let actor = Actor::from_parts(&actor_kind, actor_user.map(UserId::from_uuid))
        .ok_or_else(|| StoreError::Backend(format!("unknown actor '{actor_kind}'")))?;

    let order_id: Uuid = row.try_get("order_id").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;

    Ok(StatusUpdate {
        id: row.try_get("id").map_err(read)?,
        subject,
        order_id: OrderId::from_uuid(order_id),
        old_status: row.try_get("old_status").map_err(read)?,
        new_status: row.try_get("new_status").map_err(read)?,
        actor,
        occurred_at,
    })
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Run an async store call from the synchronous trait surface.
pub(crate) fn block_on<F: Future>(fut: F) -> Result<F::Output, StoreError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "Postgres stores require a tokio runtime; call from a blocking task".to_string(),
        )
    })?;
    Ok(handle.block_on(fut))
}

// Implement the store traits

impl OrderStore for PostgresSyncStore {
    fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        block_on(self.load_order(id))?
    }

    fn order_number_exists(&self, number: &str) -> Result<bool, StoreError> {
        block_on(self.number_exists(number))?
    }
}

impl PrintJobStore for PostgresSyncStore {
    fn get_job(&self, id: PrintJobId) -> Result<Option<PrintJob>, StoreError> {
        block_on(self.load_job(id))?
    }

    fn jobs_for_order(&self, order_id: OrderId) -> Result<Vec<PrintJob>, StoreError> {
        block_on(self.load_jobs_for_order(order_id))?
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PrintJob>, StoreError> {
        block_on(self.query_jobs(filter))?
    }
}

impl PrinterStore for PostgresSyncStore {
    fn get_printer(&self, id: PrinterId) -> Result<Option<Printer>, StoreError> {
        block_on(self.load_printer(id))?
    }

    fn list_printers(&self) -> Result<Vec<Printer>, StoreError> {
        block_on(self.load_printers())?
    }
}

impl StatusUpdateLog for PostgresSyncStore {
    fn updates_for_order(&self, order_id: OrderId) -> Result<Vec<StatusUpdate>, StoreError> {
        block_on(self.load_updates_for_order(order_id))?
    }
}

impl SyncStore for PostgresSyncStore {
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        block_on(self.commit_changes(changes))?
    }
}
