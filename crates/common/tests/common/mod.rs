//! Shared test utilities for share service integration tests
#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use common::config::{ConfigHandle, Settings};
use common::jobs::JobReceiver;
use common::service::{ShareDownload, ShareService};
use futures::StreamExt;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct-horse-battery";
pub const OTHER_PASSWORD: &str = "tr0ub4dor";
pub const MB: u64 = 1024 * 1024;

/// Settings rooted in `dir` with both test passwords allowed
pub fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        data_dir: dir.path().to_path_buf(),
        passwords: vec![PASSWORD.to_string(), OTHER_PASSWORD.to_string()],
        burn_delay_secs: 0,
        ..Settings::default()
    }
}

/// Set up a service over a fresh temp dir.
/// The job receiver is returned unstarted; see [`start_workers`].
pub fn setup_test_env(
    configure: impl FnOnce(&mut Settings),
) -> (ShareService, JobReceiver, ConfigHandle, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(&dir);
    configure(&mut settings);
    let config = ConfigHandle::new(settings);
    let (service, receiver) = ShareService::new(config.clone());
    (service, receiver, config, dir)
}

/// Spawn the burn worker and sweeper, returning the shutdown sender
pub fn start_workers(
    service: &ShareService,
    receiver: JobReceiver,
) -> tokio::sync::watch::Sender<()> {
    let (tx, rx) = tokio::sync::watch::channel(());
    service.spawn_workers(receiver, rx);
    tx
}

/// Drain a download body completely
pub async fn read_body(download: ShareDownload) -> Vec<u8> {
    let mut body = download.body;
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// Read every entry of a zip archive, in archive order
pub fn unzip(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

/// Every path under `root`, relative and sorted, with file contents.
/// Directories carry `None`.
pub fn snapshot_tree(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Option<Vec<u8>>)>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.push((relative, None));
                walk(root, &path, out);
            } else {
                out.push((relative, Some(std::fs::read(&path).unwrap())));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
