//! Printer-side status feed, authenticated with the worker API key.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use printforge_auth::AuthContext;
use printforge_printing::JobStatus;

use crate::app::dto;
use crate::app::errors;
use crate::app::routes::common::{parse_id, parse_value};
use crate::app::services::{self, AppServices};
use crate::authz::{API_KEY_HEADER, header_str};

pub fn router() -> Router {
    Router::new().route("/device/jobs/:id/status", post(job_status))
}

pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<dto::JobStatusRequest>,
) -> axum::response::Response {
    let authorized = header_str(&headers, API_KEY_HEADER)
        .is_some_and(|key| services.device_keys.verify(key));
    if !authorized {
        tracing::warn!("device feed request with missing or invalid API key");
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "invalid API key");
    }

    let job_id = match parse_id(&id, "print job") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let to: JobStatus = match parse_value(&body.status) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = AuthContext::device_feed();

    let result = services::run(move || {
        services
            .engine
            .apply_job_status_change(job_id, to, body.progress, body.failure_reason, &auth)
    })
    .await;
    match result {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}
