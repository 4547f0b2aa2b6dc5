use std::path::PathBuf;

use clap::Args;

use common::config::Settings;
use sharedrop::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// HTTP server port (default: 8080)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage root, relative paths resolve against the config directory (default: data)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Upload password to allow; may be given more than once
    #[arg(long = "password")]
    pub passwords: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut settings = Settings::default();
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(data_dir) = &self.data_dir {
            settings.data_dir = data_dir.clone();
        }
        settings.passwords = self.passwords.clone();

        let state = AppState::init(ctx.config_path.clone(), settings)?;

        let mut output = format!(
            "Initialized sharedrop directory at: {}\n\
             - Config: {}\n\
             - Uploads: {}\n\
             - Port: {}\n\
             - Passwords: {}",
            state.config_dir.display(),
            state.config_path.display(),
            state.settings.uploads_dir().display(),
            state.settings.port,
            state.settings.passwords.len(),
        );
        if state.settings.passwords.is_empty() {
            output.push_str("\nNo passwords configured, uploads are disabled until one is added");
        }

        Ok(output)
    }
}
