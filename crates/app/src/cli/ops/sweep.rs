use clap::Args;

use common::config::ConfigHandle;
use common::service::ShareService;
use sharedrop::state::{AppState, StateError};

/// Run one expiry sweep now
#[derive(Args, Debug, Clone)]
pub struct Sweep;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Sweep {
    type Error = SweepError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let (service, _) = ShareService::new(ConfigHandle::new(state.settings));

        let report = service.sweeper().sweep().await;
        Ok(report.to_string())
    }
}
