//! Share service: upload, download and quota operations over the components.
//!
//! Upload: password check -> validation -> quota check -> persist -> link.
//! Any failure before persist has no side effects.
//!
//! Download: locate -> stream (raw file or zip) -> optional burn, where the
//! burn is a follow-up job dispatched only after the stream has handed over
//! its last byte.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use crate::archive::{self, ArchiveEntry, ArchiveStream};
use crate::bucket::{BucketId, BucketResolver, Sha256Resolver};
use crate::config::ConfigHandle;
use crate::error::{Result, ShareError};
use crate::jobs::{self, BurnClaims, JobDispatcher, JobReceiver};
use crate::quota::{QuotaCheck, QuotaReport, QuotaTracker};
use crate::rate_limit::RateLimiter;
use crate::store::{validate_filename, NewFile, Share, ShareId, ShareStore};
use crate::sweeper::ExpirySweeper;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub share_url: String,
    pub bucket_id: BucketId,
    pub share_id: ShareId,
    pub files: Vec<UploadedFile>,
    pub total_bytes: u64,
    pub burn_after_download: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    pub bucket_id: BucketId,
    pub shares: usize,
    pub used: u64,
}

/// Response metadata for a share: what a download of it would look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub filename: String,
    pub content_type: String,
    /// Known for raw single-file downloads, `None` for archives
    pub content_length: Option<u64>,
}

impl ShareInfo {
    fn of(share: &Share) -> Self {
        match share.files.as_slice() {
            [file] => Self {
                filename: file.name.clone(),
                content_type: file.content_type.clone(),
                content_length: Some(file.size),
            },
            _ => Self {
                filename: format!("{}.zip", share.id),
                content_type: "application/zip".to_string(),
                content_length: None,
            },
        }
    }
}

/// A located share ready to be streamed to a client.
#[derive(Debug)]
pub struct ShareDownload {
    pub info: ShareInfo,
    pub body: DownloadStream,
}

impl ShareDownload {
    pub fn is_archive(&self) -> bool {
        matches!(self.body.body, Body::Archive(_))
    }
}

#[derive(Debug)]
enum Body {
    File(ReaderStream<tokio::fs::File>),
    Archive(ArchiveStream),
}

/// Download bytes; completing the stream triggers the share's burn, if any.
#[derive(Debug)]
pub struct DownloadStream {
    body: Body,
    burn: Option<BurnOnComplete>,
    expected: Option<u64>,
    sent: u64,
    done: bool,
}

impl DownloadStream {
    fn new(body: Body, burn: Option<BurnOnComplete>, expected: Option<u64>) -> Self {
        let mut stream = Self {
            body,
            burn,
            expected,
            sent: 0,
            done: false,
        };
        // an empty body may never be polled by the transport
        if expected == Some(0) {
            stream.complete();
        }
        stream
    }

    fn complete(&mut self) {
        if let Some(burn) = self.burn.take() {
            burn.complete();
        }
    }
}

impl Stream for DownloadStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        let next = match &mut this.body {
            Body::File(s) => ready!(Pin::new(s).poll_next(cx)),
            Body::Archive(s) => ready!(Pin::new(s).poll_next(cx)),
        };

        match next {
            Some(Ok(chunk)) => {
                this.sent += chunk.len() as u64;
                // the transport may stop polling once content-length bytes are out
                if this.expected == Some(this.sent) {
                    this.complete();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.done = true;
                // dropping the guard releases the claim
                this.burn = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.done = true;
                this.complete();
                Poll::Ready(None)
            }
        }
    }
}

/// Holds a burn share's claim for the lifetime of its download.
///
/// Completing dispatches the burn job; dropping without completing releases
/// the claim so an interrupted download can be retried.
#[derive(Debug)]
struct BurnOnComplete {
    bucket_id: BucketId,
    share_id: ShareId,
    delay: Duration,
    jobs: JobDispatcher,
    claims: BurnClaims,
    armed: bool,
}

impl BurnOnComplete {
    fn complete(mut self) {
        self.armed = false;
        if let Err(e) = self
            .jobs
            .dispatch_burn(self.bucket_id.clone(), self.share_id.clone(), self.delay)
        {
            tracing::error!(bucket_id = %self.bucket_id, share_id = %self.share_id, "could not schedule burn: {}", e);
        }
    }
}

impl Drop for BurnOnComplete {
    fn drop(&mut self) {
        if self.armed {
            tracing::info!(bucket_id = %self.bucket_id, share_id = %self.share_id, "burn download did not complete, share kept");
            self.claims.release(&self.bucket_id, &self.share_id);
        }
    }
}

struct Inner {
    config: ConfigHandle,
    resolver: Arc<dyn BucketResolver>,
    store: ShareStore,
    quota: QuotaTracker,
    limiter: RateLimiter<IpAddr>,
    claims: BurnClaims,
    jobs: JobDispatcher,
    upload_locks: Mutex<HashMap<BucketId, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct ShareService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ShareService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareService")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl ShareService {
    /// Build a service keyed by [`Sha256Resolver`].
    ///
    /// The storage root is taken from the config snapshot at construction;
    /// moving `data_dir` requires a new service. The returned receiver must be
    /// handed to [`ShareService::spawn_workers`] for burns to run.
    pub fn new(config: ConfigHandle) -> (Self, JobReceiver) {
        Self::with_resolver(config, Arc::new(Sha256Resolver))
    }

    pub fn with_resolver(
        config: ConfigHandle,
        resolver: Arc<dyn BucketResolver>,
    ) -> (Self, JobReceiver) {
        let store = ShareStore::new(config.current().uploads_dir());
        Self::with_store(config, resolver, store)
    }

    pub fn with_store(
        config: ConfigHandle,
        resolver: Arc<dyn BucketResolver>,
        store: ShareStore,
    ) -> (Self, JobReceiver) {
        let (jobs, receiver) = JobDispatcher::new();
        let inner = Inner {
            quota: QuotaTracker::new(store.clone(), config.clone()),
            config,
            resolver,
            store,
            limiter: RateLimiter::new(),
            claims: BurnClaims::default(),
            jobs,
            upload_locks: Mutex::new(HashMap::new()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    pub fn store(&self) -> &ShareStore {
        &self.inner.store
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.inner.store.clone(),
            self.inner.config.clone(),
            self.inner.claims.clone(),
        )
    }

    /// Spawn the burn job worker and the expiry sweeper.
    pub fn spawn_workers(
        &self,
        receiver: JobReceiver,
        shutdown_rx: watch::Receiver<()>,
    ) -> Vec<JoinHandle<()>> {
        let worker = tokio::spawn(jobs::run_worker(
            receiver,
            self.inner.store.clone(),
            self.inner.claims.clone(),
            shutdown_rx.clone(),
        ));
        let sweeper = tokio::spawn(self.sweeper().run(shutdown_rx));
        vec![worker, sweeper]
    }

    /// Resolve an authorized password to its bucket.
    pub fn authorize(&self, password: &str) -> Result<BucketId> {
        if !self.inner.config.current().is_authorized(password) {
            return Err(ShareError::Unauthorized);
        }
        Ok(self.inner.resolver.resolve(password))
    }

    /// Throttle a client against the live rate-limit settings.
    pub fn check_rate(&self, client: IpAddr) -> Result<()> {
        let settings = self.inner.config.current();
        let allowed = self.inner.limiter.allow(
            &client,
            settings.rate_limit_window(),
            settings.rate_limit_max_requests,
        );
        if allowed {
            Ok(())
        } else {
            tracing::debug!(%client, "rate limited");
            Err(ShareError::RateLimited)
        }
    }

    fn upload_lock(&self, bucket_id: &BucketId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .upload_locks
            .lock()
            .entry(bucket_id.clone())
            .or_default()
            .clone()
    }

    #[tracing::instrument(skip(self, password, files), fields(files = files.len()))]
    pub async fn upload(
        &self,
        password: &str,
        files: Vec<NewFile>,
        burn_after_download: bool,
    ) -> Result<UploadReceipt> {
        let bucket_id = self.authorize(password)?;
        let settings = self.inner.config.current();

        if files.is_empty() {
            return Err(ShareError::bad_request("at least one file is required"));
        }
        let mut names = HashSet::new();
        for file in &files {
            validate_filename(&file.name)?;
            if !names.insert(file.name.as_str()) {
                return Err(ShareError::bad_request(format!(
                    "duplicate filename {:?}",
                    file.name
                )));
            }
            if file.size() > settings.max_file_size_bytes {
                return Err(ShareError::bad_request(format!(
                    "file {:?} exceeds the {} byte limit",
                    file.name, settings.max_file_size_bytes
                )));
            }
        }
        let total_bytes: u64 = files.iter().map(NewFile::size).sum();

        // serializes check+persist per bucket so racing uploads can't jointly overshoot
        let lock = self.upload_lock(&bucket_id);
        let _guard = lock.lock().await;

        if let QuotaCheck::Rejected { available } =
            self.inner.quota.check(&bucket_id, total_bytes).await?
        {
            return Err(ShareError::QuotaExceeded { available });
        }

        let share_id = self
            .inner
            .store
            .create(&bucket_id, &files, burn_after_download)
            .await?;

        Ok(UploadReceipt {
            share_url: settings.share_url(&bucket_id, &share_id),
            files: files
                .iter()
                .map(|f| UploadedFile {
                    name: f.name.clone(),
                    size: f.size(),
                })
                .collect(),
            bucket_id,
            share_id,
            total_bytes,
            burn_after_download,
        })
    }

    /// Look a share up without claiming or reading it.
    ///
    /// Serves metadata-only requests, which must not consume a burn share.
    pub async fn describe(&self, bucket_id: &BucketId, share_id: &ShareId) -> Result<ShareInfo> {
        if self.inner.claims.is_claimed(bucket_id, share_id) {
            return Err(ShareError::NotFound);
        }
        let share = self.inner.store.open(bucket_id, share_id).await?;
        Ok(ShareInfo::of(&share))
    }

    #[tracing::instrument(skip(self))]
    pub async fn download(&self, bucket_id: &BucketId, share_id: &ShareId) -> Result<ShareDownload> {
        let claims = &self.inner.claims;
        if claims.is_claimed(bucket_id, share_id) {
            return Err(ShareError::NotFound);
        }
        let share = self.inner.store.open(bucket_id, share_id).await?;

        let burn = if share.burn_after_download {
            if !claims.claim(bucket_id, share_id) {
                return Err(ShareError::NotFound);
            }
            Some(BurnOnComplete {
                bucket_id: bucket_id.clone(),
                share_id: share_id.clone(),
                delay: self.inner.config.current().burn_delay(),
                jobs: self.inner.jobs.clone(),
                claims: claims.clone(),
                armed: true,
            })
        } else {
            None
        };

        let info = ShareInfo::of(&share);
        if let [file] = share.files.as_slice() {
            let handle = match tokio::fs::File::open(&file.path).await {
                Ok(handle) => handle,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ShareError::NotFound),
                Err(e) => return Err(e.into()),
            };
            return Ok(ShareDownload {
                info,
                body: DownloadStream::new(
                    Body::File(ReaderStream::new(handle)),
                    burn,
                    Some(file.size),
                ),
            });
        }

        let entries = share
            .files
            .iter()
            .map(|f| ArchiveEntry::file(f.name.clone(), f.path.clone()))
            .collect();
        Ok(ShareDownload {
            info,
            body: DownloadStream::new(Body::Archive(archive::stream(entries)), burn, None),
        })
    }

    pub async fn quota(&self, password: &str) -> Result<QuotaReport> {
        let bucket_id = self.authorize(password)?;
        self.inner.quota.report(&bucket_id).await
    }

    /// Per-bucket usage across the whole storage tree.
    pub async fn usage(&self) -> Result<Vec<BucketUsage>> {
        let mut usage = Vec::new();
        for bucket_id in self.inner.store.list_buckets().await? {
            let shares = self.inner.store.list(&bucket_id).await?;
            usage.push(BucketUsage {
                used: shares.iter().map(|s| s.total_bytes()).sum(),
                shares: shares.len(),
                bucket_id,
            });
        }
        Ok(usage)
    }
}
