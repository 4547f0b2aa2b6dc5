/**
 * Streaming zip archives for multi-file
 *  downloads.
 */
pub mod archive;
/**
 * Bucket identity: the opaque storage key
 *  derived from an authorized password.
 */
pub mod bucket;
/**
 * Runtime settings and a live, swappable
 *  handle to them.
 */
pub mod config;
pub mod error;
/**
 * Deferred follow-up work, most notably
 *  burn-after-download deletion.
 */
pub mod jobs;
pub mod quota;
pub mod rate_limit;
/**
 * Ties the components together into the
 *  upload / download / quota operations.
 */
pub mod service;
/**
 * On-disk share layout, atomic creation
 *  and enumeration.
 */
pub mod store;
pub mod sweeper;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::bucket::{BucketId, BucketResolver, Sha256Resolver};
    pub use crate::config::{ConfigHandle, Settings};
    pub use crate::error::ShareError;
    pub use crate::quota::QuotaReport;
    pub use crate::service::{ShareDownload, ShareInfo, ShareService, UploadReceipt};
    pub use crate::store::{NewFile, ShareId, ShareStore};
    pub use crate::sweeper::{ExpirySweeper, SweepReport};
    pub use crate::version::build_info;
}
