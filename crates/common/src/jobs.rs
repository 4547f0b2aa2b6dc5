//! Background follow-up jobs
//!
//! Deferred work that must not run inside the request/response path, most
//! notably burn-after-download deletion. Jobs travel over a flume channel to a
//! single worker which schedules each one independently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::bucket::BucketId;
use crate::store::{ShareId, ShareStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Delete a burn-after-download share once its download has completed
    ///
    /// The delay gives any buffering between the storage read and the
    /// network write a chance to drain. It is a best-effort ordering, not a
    /// transactional guarantee.
    Burn {
        bucket_id: BucketId,
        share_id: ShareId,
        delay: Duration,
    },
}

/// Cloneable handle for enqueuing jobs from anywhere.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Non-blocking; fails only if the worker is gone.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::debug!(?job, "dispatching job");
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    pub fn dispatch_burn(&self, bucket_id: BucketId, share_id: ShareId, delay: Duration) -> Result<()> {
        self.dispatch(Job::Burn {
            bucket_id,
            share_id,
            delay,
        })
    }
}

#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    pub async fn recv(&self) -> Option<Job> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }
}

/// Burn shares claimed by an in-flight or completed download.
///
/// A claimed share reads as absent to every later download, which is what
/// makes a burn share retrievable only once even before its files are gone.
#[derive(Debug, Clone, Default)]
pub struct BurnClaims {
    inner: Arc<Mutex<HashSet<(BucketId, ShareId)>>>,
}

impl BurnClaims {
    /// Returns false if the share was already claimed.
    pub fn claim(&self, bucket_id: &BucketId, share_id: &ShareId) -> bool {
        self.inner
            .lock()
            .insert((bucket_id.clone(), share_id.clone()))
    }

    pub fn release(&self, bucket_id: &BucketId, share_id: &ShareId) {
        self.inner
            .lock()
            .remove(&(bucket_id.clone(), share_id.clone()));
    }

    pub fn is_claimed(&self, bucket_id: &BucketId, share_id: &ShareId) -> bool {
        self.inner
            .lock()
            .contains(&(bucket_id.clone(), share_id.clone()))
    }
}

/// Run jobs until shutdown.
///
/// On shutdown, burns still waiting out their delay and burns queued behind
/// the shutdown signal are executed immediately rather than dropped, so a
/// restart cannot resurrect a consumed share. Callers should signal shutdown
/// only once nothing can dispatch new jobs.
pub async fn run_worker(
    receiver: JobReceiver,
    store: ShareStore,
    claims: BurnClaims,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut pending = JoinSet::new();

    loop {
        tokio::select! {
            job = receiver.recv() => {
                let Some(job) = job else { break };
                let store = store.clone();
                let claims = claims.clone();
                let mut rx = shutdown_rx.clone();
                pending.spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(job.delay()) => {}
                        _ = rx.changed() => {}
                    }
                    execute(job, &store, &claims).await;
                });
            }
            Some(_) = pending.join_next(), if !pending.is_empty() => {}
            _ = shutdown_rx.changed() => {
                tracing::debug!("job worker shutting down");
                break;
            }
        }
    }

    let mut flushed = 0;
    while let Some(job) = receiver.try_recv() {
        execute(job, &store, &claims).await;
        flushed += 1;
    }
    if flushed > 0 {
        tracing::info!(flushed, "ran queued jobs on shutdown");
    }

    while pending.join_next().await.is_some() {}
}

impl Job {
    fn delay(&self) -> Duration {
        match self {
            Job::Burn { delay, .. } => *delay,
        }
    }
}

async fn execute(job: Job, store: &ShareStore, claims: &BurnClaims) {
    match job {
        Job::Burn {
            bucket_id,
            share_id,
            ..
        } => burn(store, claims, &bucket_id, &share_id).await,
    }
}

async fn burn(store: &ShareStore, claims: &BurnClaims, bucket_id: &BucketId, share_id: &ShareId) {
    match store.delete(bucket_id, share_id).await {
        Ok(()) => {
            tracing::info!(bucket_id = %bucket_id, share_id = %share_id, "burned share after download");
            claims.release(bucket_id, share_id);
        }
        // stays claimed, so it still reads as gone
        Err(e) => {
            tracing::error!(bucket_id = %bucket_id, share_id = %share_id, "failed to burn share: {}", e);
        }
    }
}
