//! Runtime settings and the live, swappable snapshot every component reads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use crate::bucket::BucketId;
use crate::store::ShareId;

pub const UPLOADS_DIR_NAME: &str = "uploads";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Port for the HTTP server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root of the storage tree; relative paths resolve against the config dir
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Allow-list of upload passwords, each one maps to its own bucket
    #[serde(default)]
    pub passwords: Vec<String>,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_bucket_size_bytes")]
    pub max_bucket_size_bytes: u64,
    /// Maximum age of a share before the sweeper removes it
    #[serde(default = "default_share_ttl_secs")]
    pub share_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Grace period between a completed burn download and the deletion
    #[serde(default = "default_burn_delay_secs")]
    pub burn_delay_secs: u64,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    /// External base URL used when issuing share links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<Url>,
    /// Directory for log files (logs to stdout only if not set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_file_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_bucket_size_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_share_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_burn_delay_secs() -> u64 {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_rate_limit_max_requests() -> u32 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            passwords: Vec::new(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_bucket_size_bytes: default_max_bucket_size_bytes(),
            share_ttl_secs: default_share_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            burn_delay_secs: default_burn_delay_secs(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            public_url: None,
            log_dir: None,
        }
    }
}

impl Settings {
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join(UPLOADS_DIR_NAME)
    }

    pub fn share_ttl(&self) -> Duration {
        Duration::from_secs(self.share_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // a zero interval would spin the sweeper
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn burn_delay(&self) -> Duration {
        Duration::from_secs(self.burn_delay_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn is_authorized(&self, password: &str) -> bool {
        !password.is_empty() && self.passwords.iter().any(|p| p == password)
    }

    /// Public download link for a share.
    pub fn share_url(&self, bucket_id: &BucketId, share_id: &ShareId) -> String {
        let base = match &self.public_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        };
        format!("{}/s/{}/{}", base, bucket_id, share_id)
    }
}

/// Owned handle to the current [`Settings`] snapshot.
///
/// Readers call [`ConfigHandle::current`] on every check, so a snapshot swapped
/// in by [`ConfigHandle::replace`] is observed by the next operation without a
/// restart. Clones share the same snapshot.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<Settings>>>,
}

impl ConfigHandle {
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<Settings> {
        self.tx.borrow().clone()
    }

    /// Atomically swap in a new snapshot, returning the previous one.
    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        self.tx.send_replace(Arc::new(settings))
    }

    /// Receiver that is notified whenever a new snapshot is swapped in.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }
}
