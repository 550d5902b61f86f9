use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use printforge_core::NotificationId;
use printforge_infra::notifications::{Channel, NotificationFilter, NotificationType, Pagination};

use crate::app::dto;
use crate::app::routes::common::{parse_id, parse_value};
use crate::app::services::{self, AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/read-all", post(mark_all_read))
        .route("/preferences", put(set_preference))
        .route("/:id/read", post(mark_read))
}

pub async fn list_notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::NotificationsQuery>,
) -> axum::response::Response {
    let notification_type: Option<NotificationType> =
        match query.notification_type.as_deref().map(parse_value).transpose() {
            Ok(v) => v,
            Err(res) => return res,
        };
    let filter = NotificationFilter {
        notification_type,
        process_token: query.process_token,
        unread_only: query.unread_only,
    };
    let pagination = Pagination::new(query.page, query.limit);
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .gateway
            .get_user_process_notifications(&auth, &filter, pagination)
    })
    .await;
    match result {
        Ok(page) => (StatusCode::OK, Json(serde_json::json!(page))).into_response(),
        Err(res) => res,
    }
}

pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: NotificationId = match parse_id(&id, "notification") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    match services::run(move || services.gateway.mark_process_notification_read(&auth, id)).await {
        Ok(notification) => (StatusCode::OK, Json(serde_json::json!(notification))).into_response(),
        Err(res) => res,
    }
}

/// Body is optional; `process_token` narrows the sweep to one process.
pub async fn mark_all_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Option<Json<dto::ReadAllBody>>,
) -> axum::response::Response {
    let Json(body) = body.unwrap_or_default();
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .gateway
            .mark_all_process_notifications_read(&auth, body.process_token.as_deref())
    })
    .await;
    match result {
        Ok(marked) => (StatusCode::OK, Json(serde_json::json!({ "marked": marked }))).into_response(),
        Err(res) => res,
    }
}

pub async fn set_preference(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PreferenceRequest>,
) -> axum::response::Response {
    let notification_type: NotificationType = match parse_value(&body.notification_type) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let channel: Channel = match parse_value(&body.channel) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let auth = principal.auth();

    let result = services::run(move || {
        services
            .dispatcher
            .set_preference(&auth, notification_type, channel, body.enabled)
    })
    .await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(res) => res,
    }
}
