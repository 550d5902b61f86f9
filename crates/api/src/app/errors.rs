use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use printforge_infra::gateway::GatewayError;
use printforge_infra::notifications::DispatchError;
use printforge_infra::{AssignmentError, SyncError};

/// Only message a client ever sees for a server-side fault.
pub const PROCESSING_ERROR: &str = "processing error";

/// Typed service errors that know their HTTP rendering.
pub trait ErrorResponse {
    fn into_error_response(self) -> axum::response::Response;
}

impl ErrorResponse for SyncError {
    fn into_error_response(self) -> axum::response::Response {
        match self {
            SyncError::InvalidTransition { .. } => {
                json_error(StatusCode::CONFLICT, "invalid_transition", self.to_string())
            }
            SyncError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
            SyncError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
            SyncError::MissingRequiredField(_) => {
                json_error(StatusCode::BAD_REQUEST, "missing_required_field", self.to_string())
            }
            SyncError::ProgressRegression { .. } => {
                json_error(StatusCode::CONFLICT, "progress_regression", self.to_string())
            }
            SyncError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            SyncError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
            SyncError::Gateway(msg) => {
                error!(error = %msg, "payment gateway call failed");
                json_error(StatusCode::BAD_GATEWAY, "payment_gateway_error", PROCESSING_ERROR)
            }
            SyncError::PersistenceFailure(_) => internal_error(),
        }
    }
}

impl ErrorResponse for AssignmentError {
    fn into_error_response(self) -> axum::response::Response {
        let code = match &self {
            AssignmentError::PrinterBusy { .. } => "printer_busy",
            AssignmentError::IncompatibleMaterial { .. } => "incompatible_material",
            AssignmentError::PrinterUnavailable { .. } => "printer_unavailable",
            AssignmentError::PrinterRetired(_) => "printer_retired",
            AssignmentError::ExceedsBuildVolume(_) => "exceeds_build_volume",
            AssignmentError::JobNotAssignable(_) => "job_not_assignable",
            AssignmentError::InvalidStatus => "invalid_status",
            AssignmentError::Validation(_) => "validation_error",
            AssignmentError::NotFound(_) => "not_found",
            AssignmentError::Forbidden(_) => "forbidden",
            AssignmentError::Conflict(_) => "conflict",
            AssignmentError::Persistence(_) => return internal_error(),
        };
        let status = match &self {
            AssignmentError::IncompatibleMaterial { .. } | AssignmentError::ExceedsBuildVolume(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AssignmentError::InvalidStatus | AssignmentError::Validation(_) => StatusCode::BAD_REQUEST,
            AssignmentError::NotFound(_) => StatusCode::NOT_FOUND,
            AssignmentError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::CONFLICT,
        };
        json_error(status, code, self.to_string())
    }
}

impl ErrorResponse for DispatchError {
    fn into_error_response(self) -> axum::response::Response {
        match self {
            DispatchError::Unauthenticated => {
                json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
            }
            DispatchError::Csrf(_) => json_error(
                StatusCode::FORBIDDEN,
                "csrf_validation_failed",
                "CSRF validation failed",
            ),
            DispatchError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
            DispatchError::InvalidToken => {
                json_error(StatusCode::BAD_REQUEST, "invalid_token", "invalid process token format")
            }
            DispatchError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
            DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            DispatchError::CriticalPreference { .. } => {
                json_error(StatusCode::BAD_REQUEST, "critical_preference", self.to_string())
            }
            DispatchError::PersistenceFailure(_) => internal_error(),
        }
    }
}

/// Status polling is customer-facing: messages are fixed, never detailed.
impl ErrorResponse for GatewayError {
    fn into_error_response(self) -> axum::response::Response {
        match self {
            GatewayError::RateLimited(limited) => {
                let mut res = json_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests",
                );
                let secs = limited.retry_after.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    res.headers_mut().insert(header::RETRY_AFTER, value);
                }
                res
            }
            GatewayError::Csrf(_) => json_error(
                StatusCode::FORBIDDEN,
                "csrf_validation_failed",
                "CSRF validation failed",
            ),
            GatewayError::Unauthenticated => {
                json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
            }
            GatewayError::InvalidToken => {
                json_error(StatusCode::BAD_REQUEST, "invalid_token", "invalid process token format")
            }
            GatewayError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "access denied"),
            GatewayError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "process not found"),
            GatewayError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            GatewayError::Internal(_) => internal_error(),
        }
    }
}

/// Detail has already been logged where the fault happened.
pub fn internal_error() -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", PROCESSING_ERROR)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &'static str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}

pub fn invalid_value(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}
