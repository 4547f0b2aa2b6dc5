use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode};

use common::bucket::BucketId;
use common::error::ShareError;
use common::service::ShareInfo;
use common::store::ShareId;

use crate::http_server::error::share_error_response;
use crate::ServiceState;

/// Stream a share to the client as an attachment.
///
/// Deliberately not rate limited: links are bearer capabilities and may be
/// fetched by many recipients. `HEAD` only describes the share, so it never
/// claims a burn share.
pub async fn handler(
    State(state): State<ServiceState>,
    method: Method,
    Path((bucket_id, share_id)): Path<(String, String)>,
) -> Result<Response, DownloadError> {
    // malformed ids can't name a share
    let bucket_id = BucketId::parse(&bucket_id).map_err(|_| ShareError::NotFound)?;
    let share_id = ShareId::parse(&share_id).map_err(|_| ShareError::NotFound)?;

    if method == Method::HEAD {
        let info = state.shares().describe(&bucket_id, &share_id).await?;
        return Ok(response_head(&info).body(Body::empty())?);
    }

    let download = state.shares().download(&bucket_id, &share_id).await?;
    Ok(response_head(&download.info).body(Body::from_stream(download.body))?)
}

fn response_head(info: &ShareInfo) -> http::response::Builder {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, info.content_type.as_str())
        .header(CONTENT_DISPOSITION, content_disposition(&info.filename));
    if let Some(len) = info.content_length {
        response = response.header(CONTENT_LENGTH, len);
    }
    response
}

/// `attachment` disposition with an ASCII fallback name and, when needed, an
/// RFC 5987 encoded UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    if fallback == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => encoded.push(byte as char),
            b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error("failed to build response: {0}")]
    Response(#[from] http::Error),
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::Share(e) => share_error_response(e),
            DownloadError::Response(e) => {
                tracing::error!("failed to build download response: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error").into_response()
            }
        }
    }
}
