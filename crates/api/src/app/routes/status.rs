//! Customer polling of long-running processes by process token.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use printforge_infra::gateway::{RequestMethod, StatusRequest};

use crate::app::dto;
use crate::app::services::{self, AppServices};
use crate::authz::{CSRF_HEADER, header_str};
use crate::context::{ClientKey, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/api/status", get(poll_status).post(post_status))
        .route("/downloads/:token", get(download))
}

async fn check(
    services: Arc<AppServices>,
    principal: PrincipalContext,
    client: ClientKey,
    process_token: String,
    method: RequestMethod,
    csrf_token: Option<String>,
) -> axum::response::Response {
    let auth = principal.auth();
    let result = services::run(move || {
        services.gateway.check_status(
            StatusRequest {
                process_token: &process_token,
                method,
                csrf_token: csrf_token.as_deref(),
                client_key: client.as_str(),
            },
            &auth,
        )
    })
    .await;
    match result {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))).into_response(),
        Err(res) => res,
    }
}

pub async fn poll_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(client): Extension<ClientKey>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    check(services, principal, client, query.process_token, RequestMethod::Get, None).await
}

/// The anti-forgery token may come in `X-CSRF-Token` or the body.
pub async fn post_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    Json(body): Json<dto::StatusBody>,
) -> axum::response::Response {
    let csrf = header_str(&headers, CSRF_HEADER)
        .map(str::to_string)
        .or(body.csrf_token);
    check(services, principal, client, body.process_token, RequestMethod::Post, csrf).await
}

pub async fn download(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(token): Path<String>,
    Query(query): Query<dto::DownloadQuery>,
) -> axum::response::Response {
    let auth = principal.auth();
    let process_token = token.clone();

    let result = services::run(move || {
        services
            .gateway
            .authorize_download(&process_token, query.expires, &query.signature, &auth)
    })
    .await;
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "process_token": token,
                "authorized": true,
            })),
        )
            .into_response(),
        Err(res) => res,
    }
}
