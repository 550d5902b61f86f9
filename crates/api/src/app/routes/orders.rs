use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use printforge_core::{OrderId, OrderItemId};
use printforge_infra::SyncError;
use printforge_orders::OrderStatus;

use crate::app::routes::common::{parse_id, parse_value};
use crate::app::services::{self, AppServices};
use crate::app::dto;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/timeline", get(get_timeline))
        .route("/:id/status", post(change_status))
        .route("/:id/payment", post(record_payment))
        .route("/:id/override", post(set_override).delete(clear_override))
        .route("/:id/notes", post(add_note))
        .route("/:id/queue", post(queue_all_items))
        .route("/:id/items/:item/queue", post(queue_item))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let auth = principal.auth();
    let input = body.into_new_order(principal.user_id());

    match services::run(move || services.place_order(input, &auth)).await {
        Ok(placed) => (StatusCode::CREATED, Json(dto::placed_order_to_json(&placed))).into_response(),
        Err(res) => res,
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.get_order(order_id, &auth)).await {
        Ok(view) => (StatusCode::OK, Json(dto::order_view_to_json(&view))).into_response(),
        Err(res) => res,
    }
}

pub async fn get_timeline(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.order_timeline(order_id, &auth)).await {
        Ok(updates) => (StatusCode::OK, Json(dto::timeline_to_json(&updates))).into_response(),
        Err(res) => res,
    }
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::OrderStatusRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let to: OrderStatus = match parse_value(&body.status) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .engine
            .apply_order_status_change(order_id, to, body.reason, &auth)
    })
    .await;
    match result {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(order))).into_response(),
        Err(res) => res,
    }
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentStatusRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .engine
            .apply_payment_status(order_id, body.status.trim(), &auth)
    })
    .await;
    match result {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(order))).into_response(),
        Err(res) => res,
    }
}

pub async fn set_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::OverrideRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let status: OrderStatus = match parse_value(&body.status) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .engine
            .override_order_status(order_id, status, body.reason, &auth)
    })
    .await;
    match result {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(order))).into_response(),
        Err(res) => res,
    }
}

pub async fn clear_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.clear_order_override(order_id, &auth)).await {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(order))).into_response(),
        Err(res) => res,
    }
}

pub async fn add_note(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::NoteRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.engine.add_order_note(order_id, body.text, &auth)).await {
        Ok(order) => (StatusCode::CREATED, Json(serde_json::json!(order))).into_response(),
        Err(res) => res,
    }
}

pub async fn queue_all_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || -> Result<_, SyncError> {
        let summary = services.engine.add_all_items_to_queue(order_id, &auth)?;
        let tokens = services.issue_job_tokens(order_id, &summary.created)?;
        Ok((summary, tokens))
    })
    .await;
    match result {
        Ok((summary, tokens)) => {
            (StatusCode::OK, Json(dto::queue_summary_to_json(&summary, &tokens))).into_response()
        }
        Err(res) => res,
    }
}

pub async fn queue_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, item)): Path<(String, String)>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let item_id: OrderItemId = match parse_id(&item, "order item") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || -> Result<_, SyncError> {
        let job = services.engine.add_item_to_queue(order_id, item_id, &auth)?;
        let tokens = services.issue_job_tokens(order_id, &[job.id_typed()])?;
        Ok((job, tokens))
    })
    .await;
    match result {
        Ok((job, tokens)) => {
            let mut body = dto::job_to_json(&job);
            body["process_token"] = serde_json::json!(tokens.first().map(|(_, t)| t));
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(res) => res,
    }
}
