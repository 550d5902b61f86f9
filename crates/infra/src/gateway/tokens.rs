//! Opaque handles customers use to poll a long-running process.
//!
//! A token is 32 ASCII alphanumerics bound to one user and one subject (an
//! order or a print job). Tokens expire but are never deleted or reissued.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::warn;

use printforge_core::UserId;

use crate::audit::Subject;
use crate::store::StoreError;

pub const PROCESS_TOKEN_LEN: usize = 32;

const ISSUE_ATTEMPTS: usize = 5;

/// `^[a-zA-Z0-9]{32}$`
pub fn is_valid_process_token(token: &str) -> bool {
    token.len() == PROCESS_TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessToken {
    pub token: String,
    pub user_id: UserId,
    pub subject: Subject,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub trait ProcessTokenStore: Send + Sync {
    /// Fails with `Conflict` if the token string is already taken.
    fn insert_token(&self, token: ProcessToken) -> Result<(), StoreError>;

    fn get_token(&self, token: &str) -> Result<Option<ProcessToken>, StoreError>;

    /// Every token ever issued for `subject`, newest first.
    fn tokens_for_subject(&self, subject: Subject) -> Result<Vec<ProcessToken>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProcessTokenStore {
    tokens: RwLock<HashMap<String, ProcessToken>>,
}

impl InMemoryProcessTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl ProcessTokenStore for InMemoryProcessTokenStore {
    fn insert_token(&self, token: ProcessToken) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        if tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict("process token already issued".to_string()));
        }
        tokens.insert(token.token.clone(), token);
        Ok(())
    }

    fn get_token(&self, token: &str) -> Result<Option<ProcessToken>, StoreError> {
        Ok(self.tokens.read().map_err(poisoned)?.get(token).cloned())
    }

    fn tokens_for_subject(&self, subject: Subject) -> Result<Vec<ProcessToken>, StoreError> {
        let mut out: Vec<ProcessToken> = self
            .tokens
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|t| t.subject == subject)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(out)
    }
}

/// Issues and resolves process tokens.
#[derive(Clone)]
pub struct ProcessTokens {
    store: Arc<dyn ProcessTokenStore>,
    ttl: Duration,
}

impl ProcessTokens {
    pub fn new(store: Arc<dyn ProcessTokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<ProcessToken, StoreError> {
        let mut last_err = None;
        for _ in 0..ISSUE_ATTEMPTS {
            let token = ProcessToken {
                token: generate(),
                user_id,
                subject,
                issued_at: now,
                expires_at: now + self.ttl,
            };
            match self.store.insert_token(token.clone()) {
                Ok(()) => return Ok(token),
                Err(StoreError::Conflict(msg)) => {
                    warn!(subject = subject.kind(), "process token collision; regenerating");
                    last_err = Some(StoreError::Conflict(msg));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Conflict("process token exhausted".to_string())))
    }

    pub fn resolve(&self, token: &str) -> Result<Option<ProcessToken>, StoreError> {
        self.store.get_token(token)
    }

    /// Newest unexpired token for `subject`.
    pub fn current_for(
        &self,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<Option<ProcessToken>, StoreError> {
        Ok(self
            .store
            .tokens_for_subject(subject)?
            .into_iter()
            .find(|t| !t.is_expired(now)))
    }

    /// The token exists, is unexpired and belongs to `user_id`.
    pub fn user_can_access(
        &self,
        token: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_token(token)?
            .is_some_and(|t| t.user_id == user_id && !t.is_expired(now)))
    }
}

fn generate() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PROCESS_TOKEN_LEN)
        .map(char::from)
        .collect()
}
