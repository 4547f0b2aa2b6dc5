//! Live settings reload.
//!
//! Polls the config file's modification time and swaps a freshly parsed
//! snapshot into the shared [`ConfigHandle`]. Readers pick it up on their
//! next operation.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

use common::config::{ConfigHandle, Settings};

use crate::state::read_settings;

pub const RELOAD_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Applied,
    /// The file changed but could not be read or parsed; the old snapshot stays
    Rejected,
}

#[derive(Debug)]
pub struct ConfigReloader {
    config_dir: PathBuf,
    config_path: PathBuf,
    handle: ConfigHandle,
    last_modified: Option<SystemTime>,
    /// Settings as last read from the file, before any pinning.
    /// Running values may differ from it, e.g. after a CLI port override.
    on_disk: Settings,
}

impl ConfigReloader {
    pub fn new(config_dir: PathBuf, config_path: PathBuf, handle: ConfigHandle) -> Self {
        let last_modified = modified(&config_path);
        let on_disk = read_settings(&config_dir, &config_path)
            .unwrap_or_else(|_| handle.current().as_ref().clone());
        Self {
            config_dir,
            config_path,
            handle,
            last_modified,
            on_disk,
        }
    }

    /// Check the file once and apply it if it changed.
    pub fn poll(&mut self) -> ReloadOutcome {
        let current_mtime = modified(&self.config_path);
        if current_mtime.is_none() || current_mtime == self.last_modified {
            return ReloadOutcome::Unchanged;
        }
        self.last_modified = current_mtime;

        let mut next = match read_settings(&self.config_dir, &self.config_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %self.config_path.display(), "ignoring invalid config: {}", e);
                return ReloadOutcome::Rejected;
            }
        };

        let current = self.handle.current();
        let previous = std::mem::replace(&mut self.on_disk, next.clone());
        pin_restart_only(&previous, &current, &mut next);
        if next == *current {
            return ReloadOutcome::Unchanged;
        }

        self.handle.replace(next);
        tracing::info!(path = %self.config_path.display(), "config reloaded");
        ReloadOutcome::Applied
    }

    pub async fn run(mut self, interval: Duration, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.poll();
                }
                _ = shutdown_rx.changed() => {
                    tracing::debug!("config reloader shutting down");
                    break;
                }
            }
        }
    }
}

/// Keep fields that only take effect at startup at their running values.
///
/// Only edits to the file itself are reported; a running value that came
/// from somewhere else (a CLI override) is kept silently.
fn pin_restart_only(previous: &Settings, current: &Settings, next: &mut Settings) -> usize {
    let mut edited = 0;
    if next.port != previous.port {
        tracing::warn!(
            running = current.port,
            configured = next.port,
            "port change requires a restart"
        );
        edited += 1;
    }
    if next.data_dir != previous.data_dir {
        tracing::warn!(
            running = %current.data_dir.display(),
            configured = %next.data_dir.display(),
            "data_dir change requires a restart"
        );
        edited += 1;
    }
    if next.log_dir != previous.log_dir {
        tracing::warn!("log_dir change requires a restart");
        edited += 1;
    }
    next.port = current.port;
    next.data_dir = current.data_dir.clone();
    next.log_dir = current.log_dir.clone();
    edited
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
