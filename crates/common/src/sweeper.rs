use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::ConfigHandle;
use crate::jobs::BurnClaims;
use crate::store::ShareStore;

/// Outcome of a single sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub buckets: usize,
    pub scanned: usize,
    pub removed: usize,
    /// Expired but held by a burn download
    pub claimed: usize,
    pub staging_removed: usize,
    pub errors: usize,
}

impl std::fmt::Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scanned {} share(s) in {} bucket(s), removed {} expired ({} held by a download), {} stale upload(s), {} error(s)",
            self.scanned,
            self.buckets,
            self.removed,
            self.claimed,
            self.staging_removed,
            self.errors
        )
    }
}

/// Deletes shares older than the configured TTL.
///
/// Shares claimed by a burn download are left to the burn job.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    store: ShareStore,
    config: ConfigHandle,
    claims: BurnClaims,
}

impl ExpirySweeper {
    pub fn new(store: ShareStore, config: ConfigHandle, claims: BurnClaims) -> Self {
        Self {
            store,
            config,
            claims,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep as if the current time were `now`.
    ///
    /// Errors on one bucket or share are logged and counted, never fatal.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let ttl = self.config.current().share_ttl();
        let mut report = SweepReport::default();

        let buckets = match self.store.list_buckets().await {
            Ok(buckets) => buckets,
            Err(e) => {
                tracing::warn!(root = %self.store.root().display(), "sweep could not list buckets: {}", e);
                report.errors += 1;
                return report;
            }
        };

        for bucket_id in buckets {
            report.buckets += 1;
            let shares = match self.store.list(&bucket_id).await {
                Ok(shares) => shares,
                Err(e) => {
                    tracing::warn!(bucket_id = %bucket_id, "sweep skipping bucket: {}", e);
                    report.errors += 1;
                    continue;
                }
            };

            for share in shares {
                report.scanned += 1;
                if share.age(now) <= ttl {
                    continue;
                }
                if self.claims.is_claimed(&bucket_id, &share.id) {
                    report.claimed += 1;
                    continue;
                }
                match self.store.delete(&bucket_id, &share.id).await {
                    Ok(()) => {
                        tracing::info!(bucket_id = %bucket_id, share_id = %share.id, "expired share removed");
                        report.removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(bucket_id = %bucket_id, share_id = %share.id, "failed to remove expired share: {}", e);
                        report.errors += 1;
                    }
                }
            }

            match self.store.remove_stale_staging(&bucket_id, ttl, now).await {
                Ok(n) => report.staging_removed += n,
                Err(e) => {
                    tracing::warn!(bucket_id = %bucket_id, "failed to remove stale uploads: {}", e);
                    report.errors += 1;
                }
            }
            self.store.remove_bucket_if_empty(&bucket_id).await;
        }

        report
    }

    /// Sweep once immediately, then every `sweep_interval` until shutdown.
    ///
    /// The interval is re-read from the live config after every pass.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            let report = self.sweep().await;
            tracing::info!(
                scanned = report.scanned,
                removed = report.removed,
                errors = report.errors,
                "expiry sweep finished"
            );

            let interval = self.config.current().sweep_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    tracing::debug!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
