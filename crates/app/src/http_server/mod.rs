use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

pub mod api;
mod config;
mod download;
mod error;
mod handlers;
mod health;

pub use config::Config;

use crate::ServiceState;

const API_PREFIX: &str = "/api";
const STATUS_PREFIX: &str = "/_status";

/// Build the full router: status, API, and share download routes.
pub fn router(config: Config, state: ServiceState) -> Router {
    let log_level = config.log_level;
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .nest(API_PREFIX, api::router(state.clone()))
        .route("/s/:bucket_id/:share_id", get(download::handler))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(config.body_limit))
        .with_state(state)
        .layer(trace_layer)
}

/// Run the HTTP server until the shutdown signal fires.
pub async fn run(
    config: Config,
    state: ServiceState,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listen_addr = config.listen_addr;
    let router = router(config, state);

    tracing::info!(addr = ?listen_addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    })
    .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use common::config::Settings;
    use tower::ServiceExt;

    use super::*;
    use crate::service_config::Config as ServiceConfig;

    const PASSWORD: &str = "letmein";
    const BOUNDARY: &str = "XXsharedropXX";

    async fn setup(configure: impl FnOnce(&mut Settings)) -> (Router, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            data_dir: temp.path().to_path_buf(),
            passwords: vec![PASSWORD.to_string()],
            ..Settings::default()
        };
        configure(&mut settings);

        let service_config = ServiceConfig {
            port: settings.port,
            settings: settings.clone(),
            config_dir: temp.path().to_path_buf(),
            config_path: None,
            log_level: tracing::Level::INFO,
            log_dir: None,
        };
        let (state, _receiver) = ServiceState::from_config(&service_config).await.unwrap();
        let config = Config::new(SocketAddr::from(([127, 0, 0, 1], 0)), &settings);
        let router = router(config, state)
            .layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        (router, temp)
    }

    fn multipart_body(password: &str, burn: bool, files: &[(&str, &str)]) -> String {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\n{password}\r\n"
        );
        if burn {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"burn\"\r\n\r\non\r\n"
            ));
        }
        for (name, contents) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{contents}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload_request(password: &str, burn: bool, files: &[(&str, &str)]) -> Request<Body> {
        multipart_request(Body::from(multipart_body(password, burn, files)))
    }

    fn multipart_request(body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v0/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    fn head(uri: &str) -> Request<Body> {
        Request::builder()
            .method("HEAD")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn quota_request(password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v0/quota")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "password": password }).to_string(),
            ))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Path component of the issued share url
    fn share_path(receipt: &serde_json::Value) -> String {
        let url = url::Url::parse(receipt["share_url"].as_str().unwrap()).unwrap();
        url.path().to_string()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (router, _temp) = setup(|_| {}).await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("hello.txt", "hello world")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let receipt = json(response).await;
        assert_eq!(receipt["total_bytes"], 11);
        assert_eq!(receipt["burn_after_download"], false);

        let response = router.oneshot(get(&share_path(&receipt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hello.txt\""
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_multi_file_download_is_zip() {
        let (router, _temp) = setup(|_| {}).await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("a.txt", "a"), ("b.txt", "b")]))
            .await
            .unwrap();
        let receipt = json(response).await;
        let share_id = receipt["share_id"].as_str().unwrap().to_string();

        let response = router.oneshot(get(&share_path(&receipt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{}.zip\"", share_id).as_str()
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        // local file header signature
        assert_eq!(&body[..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_burn_share_served_once() {
        let (router, _temp) = setup(|_| {}).await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, true, &[("once.txt", "gone soon")]))
            .await
            .unwrap();
        let receipt = json(response).await;
        assert_eq!(receipt["burn_after_download"], true);

        let response = router
            .clone()
            .oneshot(get(&share_path(&receipt)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"gone soon");

        let response = router.oneshot(get(&share_path(&receipt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let (router, _temp) = setup(|s| s.max_bucket_size_bytes = 4).await;

        let response = router
            .clone()
            .oneshot(upload_request("nope", false, &[("a.txt", "a")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("..", "a")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(upload_request(PASSWORD, false, &[("big.bin", "12345")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json(response).await["available"], 4);
    }

    #[tokio::test]
    async fn test_bad_password_stops_before_file_parts() {
        let (router, temp) = setup(|_| {}).await;

        // the body fails right after the file part's headers; reading the file
        // would surface that as a multipart error instead of a 401
        let head = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\nnope\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"big.bin\"\r\n\r\n\
             partial"
        );
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(head.into_bytes()),
            Err(std::io::Error::other("connection reset")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));

        let response = router.oneshot(multipart_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!temp.path().join("uploads").read_dir().unwrap().any(|_| true));
    }

    #[tokio::test]
    async fn test_file_part_must_follow_password() {
        let (router, _temp) = setup(|_| {}).await;

        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.txt\"\r\n\r\na\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\n{PASSWORD}\r\n\
             --{BOUNDARY}--\r\n"
        );
        let response = router
            .oneshot(multipart_request(Body::from(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oversized_file_part_rejected() {
        let (router, _temp) = setup(|s| s.max_file_size_bytes = 4).await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("big.bin", "12345")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(upload_request(PASSWORD, false, &[("ok.bin", "1234")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_head_does_not_consume_burn_share() {
        let (router, _temp) = setup(|_| {}).await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, true, &[("empty.txt", "")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let path = share_path(&json(response).await);

        for _ in 0..2 {
            let response = router.clone().oneshot(head(&path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_LENGTH], "0");
        }

        let response = router.clone().oneshot(get(&path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.clone().oneshot(get(&path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = router.oneshot(head(&path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quota_endpoint() {
        let (router, _temp) = setup(|s| s.max_bucket_size_bytes = 100).await;

        router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("a.txt", "0123456789")]))
            .await
            .unwrap();

        let response = router.clone().oneshot(quota_request(PASSWORD)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json(response).await,
            serde_json::json!({"used": 10, "max": 100, "available": 90})
        );

        let response = router.oneshot(quota_request("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_is_rate_limited_downloads_are_not() {
        let (router, _temp) = setup(|s| {
            s.rate_limit_max_requests = 2;
            s.rate_limit_window_secs = 3600;
        })
        .await;

        let response = router
            .clone()
            .oneshot(upload_request(PASSWORD, false, &[("a.txt", "a")]))
            .await
            .unwrap();
        let receipt = json(response).await;

        let response = router.clone().oneshot(quota_request(PASSWORD)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router.clone().oneshot(quota_request(PASSWORD)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        for _ in 0..5 {
            let response = router
                .clone()
                .oneshot(get(&share_path(&receipt)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_missing_and_malformed_shares() {
        let (router, _temp) = setup(|_| {}).await;

        for uri in [
            "/s/0123456789abcdef/abcd1234",
            "/s/not-a-bucket/abcd1234",
            "/s/0123456789abcdef/..",
            "/s/0123456789abcdef",
        ] {
            let response = router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_status_and_fallback() {
        let (router, _temp) = setup(|_| {}).await;

        let response = router.clone().oneshot(get("/_status/livez")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router.clone().oneshot(get("/_status/version")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .uri("/nowhere")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["msg"], "not found");
    }
}
