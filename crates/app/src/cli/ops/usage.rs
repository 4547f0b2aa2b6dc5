use clap::Args;

use common::config::ConfigHandle;
use common::error::ShareError;
use common::service::ShareService;
use sharedrop::state::{AppState, StateError};

/// Report share count and used bytes per bucket
#[derive(Args, Debug, Clone)]
pub struct Usage;

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("failed to scan storage: {0}")]
    Scan(#[from] ShareError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Usage {
    type Error = UsageError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let max = state.settings.max_bucket_size_bytes;
        let (service, _) = ShareService::new(ConfigHandle::new(state.settings));

        let usage = service.usage().await?;
        if usage.is_empty() {
            return Ok("no buckets".to_string());
        }

        let mut lines = vec![format!(
            "{:<16}  {:>6}  {:>14}  {:>14}",
            "BUCKET", "SHARES", "USED", "AVAILABLE"
        )];
        for bucket in usage {
            lines.push(format!(
                "{:<16}  {:>6}  {:>14}  {:>14}",
                bucket.bucket_id,
                bucket.shares,
                bucket.used,
                max.saturating_sub(bucket.used)
            ));
        }
        Ok(lines.join("\n"))
    }
}
