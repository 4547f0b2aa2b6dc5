use std::net::SocketAddr;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{ConnectInfo, Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use common::error::ShareError;
use common::store::NewFile;

use crate::http_server::error::share_error_response;
use crate::ServiceState;

/// Multipart upload.
///
/// Fields: `password`, optional `burn`, and one or more `file` / `files`
/// parts, each carrying a filename. The password must precede the file parts:
/// it is checked as soon as it arrives, and file parts are only read for an
/// authorized request, stopping at the per-file size limit.
pub async fn handler(
    State(state): State<ServiceState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadError> {
    state.shares().check_rate(client.ip())?;

    let mut password: Option<String> = None;
    let mut burn = false;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "password" => {
                let text = field.text().await?;
                state.shares().authorize(&text)?;
                password = Some(text);
            }
            "burn" => burn = parse_flag(&field.text().await?),
            "file" | "files" => {
                if password.is_none() {
                    tracing::debug!(%client, "file part before password");
                    return Err(ShareError::Unauthorized.into());
                }
                let limit = state.config().current().max_file_size_bytes;
                let filename = field.file_name().unwrap_or("").to_string();
                let data = read_file(field, &filename, limit).await?;
                // browsers send an empty, unnamed part for an untouched file input
                if filename.is_empty() && data.is_empty() {
                    continue;
                }
                files.push(NewFile::new(filename, data));
            }
            _ => {}
        }
    }

    let password = password.ok_or(ShareError::Unauthorized)?;
    tracing::debug!(%client, files = files.len(), burn, "upload received");
    let receipt = state.shares().upload(&password, files, burn).await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Buffer one file part, giving up as soon as it passes `limit` bytes.
async fn read_file(
    mut field: Field<'_>,
    filename: &str,
    limit: u64,
) -> Result<Vec<u8>, UploadError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if (data.len() + chunk.len()) as u64 > limit {
            return Err(ShareError::bad_request(format!(
                "file {:?} exceeds the {} byte limit",
                filename, limit
            ))
            .into());
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match self {
            UploadError::Share(e) => share_error_response(e),
            // carries 413 when the body limit is hit
            UploadError::Multipart(e) => {
                let msg = serde_json::json!({"msg": format!("Bad request: {}", e.body_text())});
                (e.status(), Json(msg)).into_response()
            }
        }
    }
}
