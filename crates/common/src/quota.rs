//! Per-bucket storage quota.
//!
//! Usage is always recomputed from the store rather than cached, so there is
//! no counter to drift out of sync with what is actually on disk.

use serde::{Deserialize, Serialize};

use crate::bucket::BucketId;
use crate::config::ConfigHandle;
use crate::error::Result;
use crate::store::ShareStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    Allowed,
    /// `available` is how many more bytes would still fit
    Rejected { available: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaReport {
    pub used: u64,
    pub max: u64,
    pub available: u64,
}

impl QuotaCheck {
    pub fn evaluate(used: u64, max: u64, incoming: u64) -> Self {
        match used.checked_add(incoming) {
            Some(total) if total <= max => QuotaCheck::Allowed,
            _ => QuotaCheck::Rejected {
                available: max.saturating_sub(used),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaTracker {
    store: ShareStore,
    config: ConfigHandle,
}

impl QuotaTracker {
    pub fn new(store: ShareStore, config: ConfigHandle) -> Self {
        Self { store, config }
    }

    /// Sum of file sizes across the bucket's visible shares.
    pub async fn used(&self, bucket_id: &BucketId) -> Result<u64> {
        let shares = self.store.list(bucket_id).await?;
        Ok(shares.iter().map(|s| s.total_bytes()).sum())
    }

    /// Must be called before any byte of the incoming share is written.
    pub async fn check(&self, bucket_id: &BucketId, incoming: u64) -> Result<QuotaCheck> {
        let max = self.config.current().max_bucket_size_bytes;
        let used = self.used(bucket_id).await?;
        let verdict = QuotaCheck::evaluate(used, max, incoming);
        if let QuotaCheck::Rejected { available } = verdict {
            tracing::info!(
                bucket_id = %bucket_id,
                used,
                max,
                incoming,
                available,
                "upload rejected by quota"
            );
        }
        Ok(verdict)
    }

    pub async fn report(&self, bucket_id: &BucketId) -> Result<QuotaReport> {
        let max = self.config.current().max_bucket_size_bytes;
        let used = self.used(bucket_id).await?;
        Ok(QuotaReport {
            used,
            max,
            available: max.saturating_sub(used),
        })
    }
}
