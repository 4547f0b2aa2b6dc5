use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::error::ShareError;

/// Map a share error onto its HTTP status and JSON body.
///
/// Storage failures are logged here and reported without detail.
pub fn share_error_response(err: ShareError) -> Response {
    let status = match &err {
        ShareError::Unauthorized => StatusCode::UNAUTHORIZED,
        ShareError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ShareError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ShareError::NotFound => StatusCode::NOT_FOUND,
        ShareError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ShareError::Storage(e) => {
            tracing::error!("storage error: {}", e);
            let msg = serde_json::json!({"msg": "unexpected error"});
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(msg)).into_response();
        }
    };

    let body = match &err {
        ShareError::QuotaExceeded { available } => {
            serde_json::json!({"msg": err.to_string(), "available": available})
        }
        _ => serde_json::json!({"msg": err.to_string()}),
    };
    (status, Json(body)).into_response()
}
