//! Process callbacks: workers (API key) or the owning user (session + CSRF)
//! report status changes, progress, results and upcoming expiry.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use printforge_infra::gateway::{GatewayError, RateLimited};
use printforge_infra::notifications::{
    DispatchError, ExpirationRequest, Notification, ProgressRequest, ResultsRequest,
    StatusChangeRequest,
};

use crate::app::dto;
use crate::app::errors::ErrorResponse;
use crate::app::services::{self, AppServices};
use crate::authz::CallerIdentity;
use crate::context::{ClientKey, PrincipalContext};

pub const NOTIFY_ENDPOINT: &str = "notify";

pub fn router() -> Router {
    Router::new()
        .route("/status-change", post(status_change))
        .route("/progress", post(progress))
        .route("/results", post(results))
        .route("/expiration-warning", post(expiration_warning))
}

enum NotifyFailure {
    Limited(RateLimited),
    Dispatch(DispatchError),
}

impl From<RateLimited> for NotifyFailure {
    fn from(value: RateLimited) -> Self {
        NotifyFailure::Limited(value)
    }
}

impl From<DispatchError> for NotifyFailure {
    fn from(value: DispatchError) -> Self {
        NotifyFailure::Dispatch(value)
    }
}

impl ErrorResponse for NotifyFailure {
    fn into_error_response(self) -> axum::response::Response {
        match self {
            NotifyFailure::Limited(limited) => GatewayError::RateLimited(limited).into_error_response(),
            NotifyFailure::Dispatch(e) => e.into_error_response(),
        }
    }
}

fn notification_response(notification: Option<Notification>) -> axum::response::Response {
    match notification {
        Some(n) => (StatusCode::CREATED, Json(serde_json::json!(n))).into_response(),
        None => (StatusCode::OK, Json(serde_json::json!({ "skipped": true }))).into_response(),
    }
}

/// Resolve the caller, count the request, then hand over to the dispatcher.
async fn dispatch<F>(
    services: Arc<AppServices>,
    principal: Option<PrincipalContext>,
    client: ClientKey,
    headers: HeaderMap,
    f: F,
) -> axum::response::Response
where
    F: FnOnce(&AppServices, &CallerIdentity) -> Result<Option<Notification>, DispatchError>
        + Send
        + 'static,
{
    let identity = match CallerIdentity::resolve(&headers, principal.map(|p| p.auth())) {
        Ok(v) => v,
        Err(res) => return res,
    };

    let result = services::run(move || -> Result<_, NotifyFailure> {
        services.notify_limiter.hit(NOTIFY_ENDPOINT, client.as_str())?;
        Ok(f(services.as_ref(), &identity)?)
    })
    .await;
    match result {
        Ok(notification) => notification_response(notification),
        Err(res) => res,
    }
}

pub async fn status_change(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    Json(body): Json<dto::NotifyStatusChangeBody>,
) -> axum::response::Response {
    let request = StatusChangeRequest {
        process_token: body.process_token,
        user_id: body.user_id,
        old_status: body.old_status,
        new_status: body.new_status,
        context: body.context,
    };
    dispatch(services, principal.map(|Extension(p)| p), client, headers, move |s, id| {
        s.dispatcher
            .notify_status_change(&id.caller(), request)
            .map(Some)
    })
    .await
}

pub async fn progress(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    Json(body): Json<dto::NotifyProgressBody>,
) -> axum::response::Response {
    let request = ProgressRequest {
        process_token: body.process_token,
        user_id: body.user_id,
        percent: body.percent,
        context: body.context,
    };
    dispatch(services, principal.map(|Extension(p)| p), client, headers, move |s, id| {
        s.dispatcher.notify_progress(&id.caller(), request)
    })
    .await
}

pub async fn results(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    Json(body): Json<dto::NotifyResultsBody>,
) -> axum::response::Response {
    let request = ResultsRequest {
        process_token: body.process_token,
        user_id: body.user_id,
        summary: body.summary,
        download_url: body.download_url,
        context: body.context,
    };
    dispatch(services, principal.map(|Extension(p)| p), client, headers, move |s, id| {
        s.dispatcher
            .notify_results_available(&id.caller(), request)
            .map(Some)
    })
    .await
}

pub async fn expiration_warning(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    Json(body): Json<dto::NotifyExpirationBody>,
) -> axum::response::Response {
    let request = ExpirationRequest {
        process_token: body.process_token,
        user_id: body.user_id,
        expires_at: body.expires_at,
    };
    dispatch(services, principal.map(|Extension(p)| p), client, headers, move |s, id| {
        s.dispatcher.notify_expiration_warning(&id.caller(), request)
    })
    .await
}
