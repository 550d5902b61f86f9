use axum::{routing::get, Router};

pub mod common;
pub mod device;
pub mod jobs;
pub mod notifications;
pub mod notify;
pub mod orders;
pub mod printers;
pub mod status;
pub mod system;

/// Router for all endpoints that require a bearer session.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/csrf-token", get(system::csrf_token))
        .nest("/orders", orders::router())
        .nest("/jobs", jobs::router())
        .nest("/printers", printers::router())
        .nest("/api/notifications", notifications::router())
        .merge(status::router())
}

/// Process callbacks; the session is optional because workers use the API key.
pub fn callbacks_router() -> Router {
    Router::new().nest("/api/notify", notify::router())
}
