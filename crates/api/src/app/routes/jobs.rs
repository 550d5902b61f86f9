use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use printforge_core::{PrintJobId, PrinterId};
use printforge_infra::store::JobFilter;
use printforge_infra::{AssignmentError, SyncError};
use printforge_printing::JobStatus;

use crate::app::dto;
use crate::app::routes::common::{parse_id, parse_value};
use crate::app::services::{self, AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/status", post(change_status))
        .route("/:id/progress", post(report_progress))
        .route("/:id/priority", post(update_priority))
        .route("/:id/schedule", post(schedule))
        .route("/:id/material", post(record_material))
        .route("/:id/assign", post(assign))
        .route("/:id/release", post(release))
        .route("/:id/requeue", post(requeue))
        .route("/:id/compatible-printers", get(compatible_printers))
}

fn job_id(raw: &str) -> Result<PrintJobId, axum::response::Response> {
    parse_id(raw, "print job")
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::JobsQuery>,
) -> axum::response::Response {
    let status: Option<JobStatus> = match query.status.as_deref().map(parse_value).transpose() {
        Ok(v) => v,
        Err(res) => return res,
    };
    let order_id = match query.order_id.as_deref().map(|v| parse_id(v, "order")).transpose() {
        Ok(v) => v,
        Err(res) => return res,
    };
    let printer_id = match query.printer_id.as_deref().map(|v| parse_id(v, "printer")).transpose() {
        Ok(v) => v,
        Err(res) => return res,
    };
    let filter = JobFilter {
        status,
        order_id,
        printer_id,
        include_finished: query.include_finished,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.list_queue(&filter, &auth)).await {
        Ok(jobs) => {
            let items: Vec<_> = jobs.iter().map(dto::job_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(res) => res,
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.get_job(job_id, &auth)).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::JobStatusRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let to: JobStatus = match parse_value(&body.status) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

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

#[derive(Debug, serde::Deserialize)]
pub struct ProgressRequest {
    pub progress: u8,
}

pub async fn report_progress(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ProgressRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.report_progress(job_id, body.progress, &auth)).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}

pub async fn update_priority(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PriorityRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.update_priority(job_id, body.priority, &auth)).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}

pub async fn schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ScheduleRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.schedule_job(job_id, body.start, &auth)).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}

/// Grams of filament consumed, as reported by the print floor.
pub async fn record_material(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MaterialUsedRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.record_material_used(job_id, body.grams, &auth)).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(res) => res,
    }
}

/// Explicit printer, or the registry's pick when `printer_id` is omitted.
pub async fn assign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignRequest>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let printer_id: Option<PrinterId> =
        match body.printer_id.as_deref().map(|v| parse_id(v, "printer")).transpose() {
            Ok(v) => v,
            Err(res) => return res,
        };
    let auth = principal.auth();

    let result = services::run(move || -> Result<_, AssignmentError> {
        let registry = services.engine.registry();
        let printer_id = match printer_id {
            Some(printer_id) => registry.assign_printer(job_id, printer_id, &auth)?.printer_id(),
            None => registry.auto_assign(job_id, &auth)?,
        };
        Ok(printer_id)
    })
    .await;
    match result {
        Ok(Some(printer_id)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "job_id": job_id.to_string(),
                "printer_id": printer_id.to_string(),
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "job_id": job_id.to_string(),
                "printer_id": null,
            })),
        )
            .into_response(),
        Err(res) => res,
    }
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.registry().release_printer(job_id, &auth)).await {
        Ok(released) => {
            (StatusCode::OK, Json(serde_json::json!({ "released": released }))).into_response()
        }
        Err(res) => res,
    }
}

/// Retry a failed job; the retry gets its own process token.
pub async fn requeue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || -> Result<_, SyncError> {
        let retry = services.engine.requeue_failed_job(job_id, &auth)?;
        let token = match retry.order_id() {
            Some(order_id) => services
                .issue_job_tokens(order_id, &[retry.id_typed()])?
                .into_iter()
                .next()
                .map(|(_, t)| t),
            None => None,
        };
        Ok((retry, token))
    })
    .await;
    match result {
        Ok((retry, token)) => {
            let mut body = dto::job_to_json(&retry);
            body["process_token"] = serde_json::json!(token);
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(res) => res,
    }
}

pub async fn compatible_printers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services.engine.registry().find_compatible_printers(job_id, &auth)
    })
    .await;
    match result {
        Ok(printers) => {
            let items: Vec<_> = printers.iter().map(dto::printer_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(res) => res,
    }
}
