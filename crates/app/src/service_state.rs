use std::path::PathBuf;

use common::config::ConfigHandle;
use common::jobs::JobReceiver;
use common::service::ShareService;

use super::service_config::Config;

/// Main service state, shared by every request handler
#[derive(Debug, Clone)]
pub struct State {
    shares: ShareService,
}

impl State {
    /// Set up storage and the share service.
    ///
    /// The returned receiver feeds the background job worker and must be
    /// handed to [`ShareService::spawn_workers`].
    pub async fn from_config(config: &Config) -> Result<(Self, JobReceiver), StateSetupError> {
        let uploads = config.settings.uploads_dir();
        tokio::fs::create_dir_all(&uploads)
            .await
            .map_err(|e| StateSetupError::Storage(uploads.clone(), e))?;
        tracing::info!(path = %uploads.display(), "using share storage");

        let handle = ConfigHandle::new(config.settings.clone());
        let (shares, receiver) = ShareService::new(handle);
        Ok((Self { shares }, receiver))
    }

    pub fn shares(&self) -> &ShareService {
        &self.shares
    }

    pub fn config(&self) -> &ConfigHandle {
        self.shares.config()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("failed to create storage directory {0}: {1}")]
    Storage(PathBuf, std::io::Error),
}
