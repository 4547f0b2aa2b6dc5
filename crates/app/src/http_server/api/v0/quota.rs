use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use common::error::ShareError;
use common::quota::QuotaReport;

use crate::http_server::error::share_error_response;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub password: String,
}

pub async fn handler(
    State(state): State<ServiceState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Json(req): Json<QuotaRequest>,
) -> Result<Json<QuotaReport>, QuotaError> {
    state.shares().check_rate(client.ip())?;
    let report = state.shares().quota(&req.password).await?;
    Ok(Json(report))
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error(transparent)]
    Share(#[from] ShareError),
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        match self {
            QuotaError::Share(e) => share_error_response(e),
        }
    }
}
