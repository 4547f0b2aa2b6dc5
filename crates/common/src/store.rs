//! On-disk share persistence.
//!
//! Layout: `<root>/<bucket_id>/<share_id>/<filename>`, plus a zero-byte
//! [`BURN_MARKER`] file in shares that should be destroyed after their first
//! download. Shares are written into a hidden staging directory inside the
//! bucket and revealed with a single `rename`, so readers never observe a
//! partially written share.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::bucket::BucketId;
use crate::error::{Result, ShareError};

pub const SHARE_ID_LEN: usize = 8;
const SHARE_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Zero-byte marker denoting burn-after-download.
pub const BURN_MARKER: &str = ".burn";
const STAGING_PREFIX: &str = ".staging-";
const MAX_CREATE_ATTEMPTS: usize = 8;
const MAX_FILENAME_BYTES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShareId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid share id: {0:?}")]
pub struct InvalidShareId(pub String);

impl ShareId {
    pub fn generate() -> Self {
        Self(random_token(SHARE_ID_LEN))
    }

    /// Parse an untrusted id; only `[a-z0-9]{SHARE_ID_LEN}` is accepted.
    pub fn parse(s: &str) -> std::result::Result<Self, InvalidShareId> {
        let valid = s.len() == SHARE_ID_LEN && s.bytes().all(|b| SHARE_ID_ALPHABET.contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidShareId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShareId {
    type Error = InvalidShareId;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShareId> for String {
    fn from(id: ShareId) -> Self {
        id.0
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SHARE_ID_ALPHABET[rng.random_range(0..SHARE_ID_ALPHABET.len())] as char)
        .collect()
}

/// A file handed to [`ShareStore::create`].
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub data: Bytes,
}

impl NewFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A stored file within a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub path: PathBuf,
}

/// A share as found on disk.
#[derive(Debug, Clone)]
pub struct Share {
    pub bucket_id: BucketId,
    pub id: ShareId,
    pub created_at: SystemTime,
    pub burn_after_download: bool,
    /// Sorted by name
    pub files: Vec<ShareFile>,
}

impl Share {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Age relative to `now`; a creation time in the future counts as zero.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }
}

/// Reject names that could resolve outside the share directory.
///
/// Dot-prefixed names are reserved for the burn marker and staging entries.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ShareError::bad_request("empty filename"));
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(ShareError::bad_request(format!(
            "filename longer than {} bytes",
            MAX_FILENAME_BYTES
        )));
    }
    if name.starts_with('.') {
        return Err(ShareError::bad_request(format!(
            "filename {:?} may not start with '.'",
            name
        )));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(ShareError::bad_request(format!(
            "filename {:?} contains a path separator or control character",
            name
        )));
    }
    Ok(())
}

type IdSource = Arc<dyn Fn() -> ShareId + Send + Sync>;

#[derive(Clone)]
pub struct ShareStore {
    root: PathBuf,
    next_id: IdSource,
}

impl fmt::Debug for ShareStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ShareStore {
    /// Store rooted at `root` (normally `<data_dir>/uploads`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: Arc::new(ShareId::generate),
        }
    }

    /// Replace the share id generator, e.g. to force collisions in tests.
    pub fn with_id_source(
        mut self,
        source: impl Fn() -> ShareId + Send + Sync + 'static,
    ) -> Self {
        self.next_id = Arc::new(source);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket_id: &BucketId) -> PathBuf {
        self.root.join(bucket_id.as_str())
    }

    pub fn share_dir(&self, bucket_id: &BucketId, share_id: &ShareId) -> PathBuf {
        self.bucket_dir(bucket_id).join(share_id.as_str())
    }

    /// Persist `files` as a new share and return its id.
    ///
    /// Either every file becomes visible under the new id or nothing does.
    pub async fn create(
        &self,
        bucket_id: &BucketId,
        files: &[NewFile],
        burn_after_download: bool,
    ) -> Result<ShareId> {
        if files.is_empty() {
            return Err(ShareError::bad_request("at least one file is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for file in files {
            validate_filename(&file.name)?;
            if !seen.insert(file.name.as_str()) {
                return Err(ShareError::bad_request(format!(
                    "duplicate filename {:?}",
                    file.name
                )));
            }
        }

        let bucket_dir = self.bucket_dir(bucket_id);
        let staging = bucket_dir.join(format!("{}{}", STAGING_PREFIX, random_token(12)));
        fs::create_dir_all(&staging).await?;

        let result = async {
            write_files(&staging, files, burn_after_download).await?;
            self.reveal(&bucket_dir, &staging).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %staging.display(), "failed to clean up staging dir: {}", e);
                }
            }
        }

        let share_id = result?;
        tracing::info!(
            bucket_id = %bucket_id,
            share_id = %share_id,
            files = files.len(),
            burn = burn_after_download,
            "share created"
        );
        Ok(share_id)
    }

    /// Move the staging dir to a fresh id. `rename` onto an existing
    /// (non-empty) share fails, which is treated as an id collision.
    async fn reveal(&self, bucket_dir: &Path, staging: &Path) -> Result<ShareId> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let share_id = (self.next_id)();
            let target = bucket_dir.join(share_id.as_str());
            if fs::try_exists(&target).await? {
                tracing::debug!(share_id = %share_id, "share id collision, retrying");
                continue;
            }
            match fs::rename(staging, &target).await {
                Ok(()) => return Ok(share_id),
                Err(e) => {
                    if !fs::try_exists(&target).await.unwrap_or(false) {
                        return Err(e.into());
                    }
                    tracing::debug!(share_id = %share_id, "share id raced, retrying");
                }
            }
        }
        Err(ShareError::Storage(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique share id",
        )))
    }

    /// Enumerate bucket directories. A missing root yields no buckets.
    pub async fn list_buckets(&self) -> Result<Vec<BucketId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match BucketId::parse(&name) {
                Ok(id) if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) => {
                    buckets.push(id)
                }
                _ => tracing::debug!(name = %name, "skipping non-bucket entry"),
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    /// Enumerate the visible shares of a bucket.
    ///
    /// Shares that cannot be read are logged and skipped so one bad subtree
    /// does not hide the rest of the bucket.
    pub async fn list(&self, bucket_id: &BucketId) -> Result<Vec<Share>> {
        let mut entries = match fs::read_dir(self.bucket_dir(bucket_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut shares = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(share_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| ShareId::parse(name).ok())
            else {
                continue;
            };
            match self.open(bucket_id, &share_id).await {
                Ok(share) => shares.push(share),
                Err(ShareError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(bucket_id = %bucket_id, share_id = %share_id, "skipping unreadable share: {}", e);
                }
            }
        }
        shares.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(shares)
    }

    /// Resolve a share's file list for reading.
    pub async fn open(&self, bucket_id: &BucketId, share_id: &ShareId) -> Result<Share> {
        let dir = self.share_dir(bucket_id, share_id);
        let dir_meta = match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => meta,
            Ok(_) => return Err(ShareError::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ShareError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ShareError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let mut burn_after_download = false;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == BURN_MARKER {
                burn_after_download = true;
                continue;
            }
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let content_type = mime_guess::from_path(&name)
                .first_or_octet_stream()
                .to_string();
            files.push(ShareFile {
                path: entry.path(),
                size: meta.len(),
                content_type,
                name,
            });
        }

        if files.is_empty() {
            return Err(ShareError::NotFound);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Share {
            bucket_id: bucket_id.clone(),
            id: share_id.clone(),
            created_at: dir_meta.modified()?,
            burn_after_download,
            files,
        })
    }

    /// Remove a share. Deleting an absent share is not an error.
    ///
    /// The bucket directory is removed as well once it holds nothing else.
    pub async fn delete(&self, bucket_id: &BucketId, share_id: &ShareId) -> Result<()> {
        match fs::remove_dir_all(self.share_dir(bucket_id, share_id)).await {
            Ok(()) => {
                tracing::info!(bucket_id = %bucket_id, share_id = %share_id, "share deleted");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remove_bucket_if_empty(bucket_id).await;
        Ok(())
    }

    /// `remove_dir` refuses non-empty directories, so a concurrent upload's
    /// staging dir keeps the bucket alive.
    pub async fn remove_bucket_if_empty(&self, bucket_id: &BucketId) -> bool {
        match fs::remove_dir(self.bucket_dir(bucket_id)).await {
            Ok(()) => {
                tracing::debug!(bucket_id = %bucket_id, "removed empty bucket");
                true
            }
            Err(_) => false,
        }
    }

    /// Remove staging dirs older than `max_age`, left behind by a crash mid-upload.
    pub async fn remove_stale_staging(
        &self,
        bucket_id: &BucketId,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<usize> {
        let mut entries = match fs::read_dir(self.bucket_dir(bucket_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(STAGING_PREFIX));
            if !is_staging {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn write_files(staging: &Path, files: &[NewFile], burn_after_download: bool) -> Result<()> {
    for file in files {
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staging.join(&file.name))
            .await?;
        out.write_all(&file.data).await?;
        out.sync_all().await?;
    }
    if burn_after_download {
        fs::File::create(staging.join(BURN_MARKER))
            .await?
            .sync_all()
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn bucket() -> BucketId {
        BucketId::parse("00112233aabbccdd").unwrap()
    }

    #[tokio::test]
    async fn test_create_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path());

        let files = vec![NewFile::new("b.txt", "bbb"), NewFile::new("a.png", "aa")];
        let id = store.create(&bucket(), &files, false).await.unwrap();

        let share = store.open(&bucket(), &id).await.unwrap();
        assert!(!share.burn_after_download);
        assert_eq!(share.total_bytes(), 5);
        let names: Vec<_> = share.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.png", "b.txt"]);
        assert_eq!(share.files[0].content_type, "image/png");

        store.delete(&bucket(), &id).await.unwrap();
        assert!(matches!(
            store.open(&bucket(), &id).await,
            Err(ShareError::NotFound)
        ));
        // bucket dir goes away with its last share
        assert!(!store.bucket_dir(&bucket()).exists());
        // second delete is a no-op
        store.delete(&bucket(), &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_burn_marker_is_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path());

        let id = store
            .create(&bucket(), &[NewFile::new("secret.txt", "x")], true)
            .await
            .unwrap();
        let share = store.open(&bucket(), &id).await.unwrap();
        assert!(share.burn_after_download);
        assert_eq!(share.files.len(), 1);
        assert!(store.share_dir(&bucket(), &id).join(BURN_MARKER).exists());
    }

    #[tokio::test]
    async fn test_id_collision_retries() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        // first two creates both draw "aaaaaaaa", the retry draws "bbbbbbbb"
        let store = ShareStore::new(dir.path()).with_id_source(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let id = if n < 2 { "aaaaaaaa" } else { "bbbbbbbb" };
            ShareId::parse(id).unwrap()
        });

        let first = store
            .create(&bucket(), &[NewFile::new("one.txt", "1")], false)
            .await
            .unwrap();
        let second = store
            .create(&bucket(), &[NewFile::new("two.txt", "2")], false)
            .await
            .unwrap();

        assert_eq!(first.as_str(), "aaaaaaaa");
        assert_eq!(second.as_str(), "bbbbbbbb");
        let first_share = store.open(&bucket(), &first).await.unwrap();
        assert_eq!(first_share.files[0].name, "one.txt");
    }

    #[tokio::test]
    async fn test_exhausted_ids_leave_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path())
            .with_id_source(|| ShareId::parse("samesame").unwrap());

        store
            .create(&bucket(), &[NewFile::new("one.txt", "1")], false)
            .await
            .unwrap();
        let err = store
            .create(&bucket(), &[NewFile::new("two.txt", "2")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Storage(_)));

        let entries: Vec<_> = std::fs::read_dir(store.bucket_dir(&bucket()))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("samesame")]);
    }

    #[tokio::test]
    async fn test_rejects_traversal_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path().join("uploads"));

        for name in ["../escape.txt", "..", ".", "a/b.txt", "..\\win.txt", "", ".burn", "nul\0.txt"] {
            let err = store
                .create(&bucket(), &[NewFile::new(name, "x")], false)
                .await
                .unwrap_err();
            assert!(matches!(err, ShareError::BadRequest(_)), "{name:?} accepted");
        }
        // nothing was written anywhere under the temp dir
        assert!(!dir.path().join("escape.txt").exists());
        assert!(!dir.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn test_rejects_duplicates_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path());

        let dupes = [NewFile::new("a.txt", "1"), NewFile::new("a.txt", "2")];
        assert!(matches!(
            store.create(&bucket(), &dupes, false).await,
            Err(ShareError::BadRequest(_))
        ));
        assert!(matches!(
            store.create(&bucket(), &[], false).await,
            Err(ShareError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_staging_and_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path());
        let id = store
            .create(&bucket(), &[NewFile::new("a.txt", "1")], false)
            .await
            .unwrap();

        let bucket_dir = store.bucket_dir(&bucket());
        std::fs::create_dir(bucket_dir.join(".staging-inflight")).unwrap();
        std::fs::write(bucket_dir.join(".staging-inflight").join("x"), "partial").unwrap();
        std::fs::create_dir(bucket_dir.join("emptydir")).unwrap();
        std::fs::write(dir.path().join("README"), "not a bucket").unwrap();

        let shares = store.list(&bucket()).await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].id, id);
        assert_eq!(store.list_buckets().await.unwrap(), vec![bucket()]);
    }

    #[tokio::test]
    async fn test_stale_staging_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::new(dir.path());
        let bucket_dir = store.bucket_dir(&bucket());
        std::fs::create_dir_all(bucket_dir.join(".staging-old")).unwrap();

        let now = SystemTime::now();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.remove_stale_staging(&bucket(), ttl, now).await.unwrap(), 0);
        let later = now + Duration::from_secs(120);
        assert_eq!(store.remove_stale_staging(&bucket(), ttl, later).await.unwrap(), 1);
        assert!(!bucket_dir.join(".staging-old").exists());
    }

    #[test]
    fn test_share_id_parse() {
        assert!(ShareId::parse("abcd1234").is_ok());
        assert!(ShareId::parse("ABCD1234").is_err());
        assert!(ShareId::parse("abc").is_err());
        assert!(ShareId::parse("../../..").is_err());
        let generated = ShareId::generate();
        assert!(ShareId::parse(generated.as_str()).is_ok());
    }
}
