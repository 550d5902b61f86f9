use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use printforge_core::PrinterId;
use printforge_printing::PrinterStatus;

use crate::app::dto;
use crate::app::routes::common::{parse_id, parse_value};
use crate::app::services::{self, AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_printers).post(register_printer))
        .route("/stats", get(statistics))
        .route("/:id", get(get_printer))
        .route("/:id/status", post(set_status))
        .route("/:id/retire", post(retire))
}

pub async fn register_printer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterPrinterRequest>,
) -> axum::response::Response {
    let auth = principal.auth();
    let input = body.into_new_printer();

    match services::run(move || services.engine.registry().register_printer(input, &auth)).await {
        Ok(printer) => (StatusCode::CREATED, Json(dto::printer_to_json(&printer))).into_response(),
        Err(res) => res,
    }
}

pub async fn list_printers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let auth = principal.auth();

    match services::run(move || services.engine.registry().list_printers(&auth)).await {
        Ok(printers) => {
            let items: Vec<_> = printers.iter().map(dto::printer_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(res) => res,
    }
}

pub async fn statistics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let auth = principal.auth();

    match services::run(move || services.engine.registry().printer_statistics(&auth)).await {
        Ok(stats) => (StatusCode::OK, Json(serde_json::json!(stats))).into_response(),
        Err(res) => res,
    }
}

pub async fn get_printer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let printer_id: PrinterId = match parse_id(&id, "printer") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.registry().get_printer(printer_id, &auth)).await {
        Ok(printer) => (StatusCode::OK, Json(dto::printer_to_json(&printer))).into_response(),
        Err(res) => res,
    }
}

pub async fn set_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PrinterStatusRequest>,
) -> axum::response::Response {
    let printer_id: PrinterId = match parse_id(&id, "printer") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let status: PrinterStatus = match parse_value(&body.status) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .engine
            .registry()
            .set_printer_status(printer_id, status, &auth)
    })
    .await;
    match result {
        Ok(printer) => (StatusCode::OK, Json(dto::printer_to_json(&printer))).into_response(),
        Err(res) => res,
    }
}

pub async fn retire(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let printer_id: PrinterId = match parse_id(&id, "printer") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.registry().retire_printer(printer_id, &auth)).await {
        Ok(printer) => (StatusCode::OK, Json(dto::printer_to_json(&printer))).into_response(),
        Err(res) => res,
    }
}
