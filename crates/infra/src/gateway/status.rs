//! Customer-facing status polling.
//!
//! Checks run in a fixed order: rate limit, anti-forgery (POST only), token
//! format, access, existence. Responses carry only `status`, `progress` and,
//! for completed jobs, a signed download link.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use printforge_auth::{AuthContext, CsrfError, CsrfValidator};
use printforge_core::NotificationId;
use printforge_printing::JobStatus;

use super::rate_limit::{RateLimited, RateLimiter};
use super::signing::{DownloadLinkError, UrlSigner};
use super::tokens::{ProcessTokens, is_valid_process_token};
use crate::audit::Subject;
use crate::notifications::{
    DispatchError, Notification, NotificationDispatcher, NotificationFilter, NotificationPage,
    Pagination,
};
use crate::store::{StoreError, SyncStore};

pub const STATUS_ENDPOINT: &str = "status";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("csrf validation failed: {0}")]
    Csrf(#[from] CsrfError),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("invalid process token format")]
    InvalidToken,

    #[error("access denied")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for GatewayError {
    fn from(value: StoreError) -> Self {
        GatewayError::Internal(value.to_string())
    }
}

impl From<DispatchError> for GatewayError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Unauthenticated => GatewayError::Unauthenticated,
            DispatchError::Csrf(e) => GatewayError::Csrf(e),
            DispatchError::Forbidden(_) => GatewayError::Forbidden,
            DispatchError::InvalidToken => GatewayError::InvalidToken,
            DispatchError::NotFound(what) => GatewayError::NotFound(what),
            DispatchError::Validation(msg) => GatewayError::Validation(msg),
            e @ DispatchError::CriticalPreference { .. } => GatewayError::Validation(e.to_string()),
            DispatchError::PersistenceFailure(msg) => GatewayError::Internal(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusRequest<'a> {
    pub process_token: &'a str,
    pub method: RequestMethod,
    pub csrf_token: Option<&'a str>,
    /// Rate-limit identity of the caller (forwarded IP, `user:{id}`, ...).
    pub client_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

pub struct AsyncStatusGateway {
    limiter: Arc<dyn RateLimiter>,
    csrf: Arc<dyn CsrfValidator>,
    tokens: ProcessTokens,
    processes: Arc<dyn SyncStore>,
    signer: UrlSigner,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AsyncStatusGateway {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        csrf: Arc<dyn CsrfValidator>,
        tokens: ProcessTokens,
        processes: Arc<dyn SyncStore>,
        signer: UrlSigner,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            limiter,
            csrf,
            tokens,
            processes,
            signer,
            dispatcher,
        }
    }

    pub fn check_status(
        &self,
        request: StatusRequest<'_>,
        auth: &AuthContext,
    ) -> Result<SanitizedStatus, GatewayError> {
        let result = self.check_status_inner(request, auth);
        if let Err(e) = &result {
            match e {
                GatewayError::Internal(detail) => {
                    error!(error = %detail, "status check failed")
                }
                // Already logged by the limiter.
                GatewayError::RateLimited(_) => {}
                other => warn!(error = %other, "status check rejected"),
            }
        }
        result
    }

    fn check_status_inner(
        &self,
        request: StatusRequest<'_>,
        auth: &AuthContext,
    ) -> Result<SanitizedStatus, GatewayError> {
        self.limiter.hit(STATUS_ENDPOINT, request.client_key)?;

        let now = Utc::now();
        let user_id = auth.user_id().ok_or(GatewayError::Unauthenticated)?;
        if request.method == RequestMethod::Post {
            self.csrf.validate(request.csrf_token, user_id, now)?;
        }

        if !is_valid_process_token(request.process_token) {
            return Err(GatewayError::InvalidToken);
        }
        if !self.tokens.user_can_access(request.process_token, user_id, now)? {
            return Err(GatewayError::Forbidden);
        }
        let token = self
            .tokens
            .resolve(request.process_token)?
            .ok_or(GatewayError::Forbidden)?;

        match token.subject {
            Subject::Order(id) => {
                let order = self
                    .processes
                    .get_order(id)?
                    .ok_or_else(|| GatewayError::NotFound("process".to_string()))?;
                Ok(SanitizedStatus {
                    status: order.status().to_string(),
                    progress: None,
                    download_url: None,
                })
            }
            Subject::PrintJob(id) => {
                let job = self
                    .processes
                    .get_job(id)?
                    .ok_or_else(|| GatewayError::NotFound("process".to_string()))?;
                let download_url = (job.status() == JobStatus::Completed)
                    .then(|| self.signer.download_url(&token.token, now));
                Ok(SanitizedStatus {
                    status: job.status().to_string(),
                    progress: Some(job.progress()),
                    download_url,
                })
            }
        }
    }

    /// Verify a signed download link and the caller's access to its process.
    pub fn authorize_download(
        &self,
        process_token: &str,
        expires: i64,
        signature: &str,
        auth: &AuthContext,
    ) -> Result<(), GatewayError> {
        let now = Utc::now();
        let user_id = auth.user_id().ok_or(GatewayError::Unauthenticated)?;
        if !is_valid_process_token(process_token) {
            return Err(GatewayError::InvalidToken);
        }
        self.signer
            .verify_download(process_token, expires, signature, now)
            .map_err(|e| match e {
                DownloadLinkError::Expired | DownloadLinkError::InvalidSignature => {
                    warn!(error = %e, "download link rejected");
                    GatewayError::Forbidden
                }
            })?;
        if !self.tokens.user_can_access(process_token, user_id, now)? {
            return Err(GatewayError::Forbidden);
        }
        Ok(())
    }

    pub fn get_user_process_notifications(
        &self,
        auth: &AuthContext,
        filter: &NotificationFilter,
        pagination: Pagination,
    ) -> Result<NotificationPage, GatewayError> {
        Ok(self.dispatcher.list_notifications(auth, filter, pagination)?)
    }

    pub fn mark_process_notification_read(
        &self,
        auth: &AuthContext,
        id: NotificationId,
    ) -> Result<Notification, GatewayError> {
        Ok(self.dispatcher.mark_read(auth, id)?)
    }

    pub fn mark_all_process_notifications_read(
        &self,
        auth: &AuthContext,
        process_token: Option<&str>,
    ) -> Result<u64, GatewayError> {
        Ok(self.dispatcher.mark_all_read(auth, process_token)?)
    }
}
