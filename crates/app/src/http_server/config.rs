use std::net::SocketAddr;

use common::config::Settings;

/// Multipart framing allowance on top of the largest acceptable payload.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
    // Request body cap, fixed at startup
    pub body_limit: usize,
}

impl Config {
    /// No single upload can exceed a bucket's whole quota, so the body cap is
    /// derived from it rather than from the per-file limit.
    pub fn new(listen_addr: SocketAddr, settings: &Settings) -> Self {
        let payload = settings
            .max_bucket_size_bytes
            .max(settings.max_file_size_bytes);
        let body_limit =
            usize::try_from(payload.saturating_add(BODY_LIMIT_SLACK)).unwrap_or(usize::MAX);
        tracing::info!(
            "Creating HTTP server Config: listen_addr={}, body_limit={}",
            listen_addr,
            body_limit
        );
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
            body_limit,
        }
    }
}
