use std::path::PathBuf;

use common::config::Settings;

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// Port for the HTTP server
    pub port: u16,

    // settings
    /// Initial settings snapshot, paths already resolved
    pub settings: Settings,
    /// Directory relative settings paths resolve against
    pub config_dir: PathBuf,
    /// Settings file polled for live changes, not watched if unset
    pub config_path: Option<PathBuf>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build a service config from loaded app state, watching its config file.
    pub fn from_app_state(state: &AppState) -> Self {
        Self {
            port: state.settings.port,
            settings: state.settings.clone(),
            config_dir: state.config_dir.clone(),
            config_path: Some(state.config_path.clone()),
            log_level: tracing::Level::INFO,
            log_dir: state.settings.log_dir.clone(),
        }
    }
}
