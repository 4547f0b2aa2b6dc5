use axum::routing::post;
use axum::Router;

use crate::ServiceState;

pub mod quota;
pub mod upload;

pub use quota::QuotaRequest;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/upload", post(upload::handler))
        .route("/quota", post(quota::handler))
        .with_state(state)
}
