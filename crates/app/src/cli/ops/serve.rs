use clap::Args;

use sharedrop::process::StartError;
use sharedrop::state::{AppState, StateError};
use sharedrop::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Override HTTP server port (default from config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("service failed: {0}")]
    Failed(#[from] StartError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;

        let mut config = ServiceConfig::from_app_state(&state);
        if let Some(port) = self.port {
            config.port = port;
            config.settings.port = port;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir.clone();
        }

        spawn_service(&config).await?;
        Ok("service ended".to_string())
    }
}
