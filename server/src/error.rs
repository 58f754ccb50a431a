//! Transport mapping of core error kinds onto HTTP statuses. Tool-level
//! failures never reach this layer; they live inside the event trace.

use aidesk_core::CoreErr;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Core(CoreErr),
}

impl From<CoreErr> for ApiError {
    fn from(err: CoreErr) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required".to_string()),
            ApiError::Core(err) => (status_for(err), err.to_string()),
        };
        if status.is_server_error() {
            error!("request failed: {message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn status_for(err: &CoreErr) -> StatusCode {
    match err {
        CoreErr::Auth => StatusCode::FORBIDDEN,
        CoreErr::Validation(_) | CoreErr::PathEscape(_) | CoreErr::SensitivePath(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreErr::NotFound(_) => StatusCode::NOT_FOUND,
        CoreErr::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CoreErr::Conflict(_) => StatusCode::CONFLICT,
        CoreErr::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CoreErr::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
        CoreErr::ProviderFailure(_)
        | CoreErr::Stream(_)
        | CoreErr::RetryLimit(_)
        | CoreErr::UnexpectedStatus(_, _) => StatusCode::BAD_GATEWAY,
        // Tool-level kinds only appear here if a direct endpoint surfaced
        // them; treat them as caller errors.
        CoreErr::ToolDisabled(_) | CoreErr::ToolTimeout(_) | CoreErr::ToolFailure(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreErr::Io(_)
        | CoreErr::Reqwest(_)
        | CoreErr::Json(_)
        | CoreErr::Sqlite(_)
        | CoreErr::TokioJoin(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
