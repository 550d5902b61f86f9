//! Postgres-backed process token store (`async_process_tokens`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use printforge_core::{OrderId, PrintJobId, UserId};

use super::tokens::{ProcessToken, ProcessTokenStore};
use crate::audit::Subject;
use crate::store::StoreError;
use crate::store::postgres::{block_on, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresProcessTokenStore {
    pool: Arc<PgPool>,
}

impl PostgresProcessTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, token), fields(subject = token.subject.kind()), err)]
    pub async fn insert(&self, token: &ProcessToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO async_process_tokens (token, user_id, subject_type, subject_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id.as_uuid())
        .bind(token.subject.kind())
        .bind(token.subject.id())
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("insert_token", e))?;
        Ok(())
    }

    #[instrument(skip(self, token), err)]
    pub async fn load(&self, token: &str) -> Result<Option<ProcessToken>, StoreError> {
        let row = sqlx::query(
            "SELECT token, user_id, subject_type, subject_id, issued_at, expires_at FROM async_process_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("get_token", e))?;
        row.as_ref().map(decode_token).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_for_subject(&self, subject: Subject) -> Result<Vec<ProcessToken>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT token, user_id, subject_type, subject_id, issued_at, expires_at
            FROM async_process_tokens
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY issued_at DESC
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id())
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("tokens_for_subject", e))?;
        rows.iter().map(decode_token).collect()
    }
}

fn decode_token(row: &sqlx::postgres::PgRow) -> Result<ProcessToken, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read process token: {e}"));

    let token: String = row.try_get("token").map_err(read)?;
    let user_id: Uuid = row.try_get("user_id").map_err(read)?;
    let subject_type: String = row.try_get("subject_type").map_err(read)?;
    let subject_id: Uuid = row.try_get("subject_id").map_err(read)?;
    let subject = match subject_type.as_str() {
        "order" => Subject::Order(OrderId::from_uuid(subject_id)),
        "print_job" => Subject::PrintJob(PrintJobId::from_uuid(subject_id)),
        other => return Err(StoreError::Backend(format!("unknown subject type '{other}'"))),
    };
    let issued_at: DateTime<Utc> = row.try_get("issued_at").map_err(read)?;
    let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(read)?;

    Ok(ProcessToken {
        // CHAR(32) comes back space-padded only when shorter; trim anyway.
        token: token.trim_end().to_string(),
        user_id: UserId::from_uuid(user_id),
        subject,
        issued_at,
        expires_at,
    })
}

impl ProcessTokenStore for PostgresProcessTokenStore {
    fn insert_token(&self, token: ProcessToken) -> Result<(), StoreError> {
        block_on(self.insert(&token))?
    }

    fn get_token(&self, token: &str) -> Result<Option<ProcessToken>, StoreError> {
        block_on(self.load(token))?
    }

    fn tokens_for_subject(&self, subject: Subject) -> Result<Vec<ProcessToken>, StoreError> {
        block_on(self.load_for_subject(subject))?
    }
}
