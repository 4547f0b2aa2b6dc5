use std::fs;
use std::path::{Path, PathBuf};

use common::config::Settings;

pub const APP_NAME: &str = "sharedrop";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// On-disk application state: the config directory and its settings file.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the config directory (~/.sharedrop)
    pub config_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded settings, with `data_dir` resolved against the config directory
    pub settings: Settings,
}

impl AppState {
    /// Get the config directory path (custom or default ~/.sharedrop)
    pub fn config_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new config directory with the given settings
    pub fn init(custom_path: Option<PathBuf>, settings: Settings) -> Result<Self, StateError> {
        let config_dir = Self::config_dir(custom_path)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&config_dir)?;
        let config_toml = toml::to_string_pretty(&settings)?;
        fs::write(&config_path, config_toml)?;

        let settings = resolve_paths(&config_dir, settings);
        fs::create_dir_all(settings.uploads_dir())?;

        Ok(Self {
            config_dir,
            config_path,
            settings,
        })
    }

    /// Load existing state from the config directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let config_dir = Self::config_dir(custom_path)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let settings = read_settings(&config_dir, &config_path)?;
        Ok(Self {
            config_dir,
            config_path,
            settings,
        })
    }
}

/// Parse a settings file, resolving relative paths against `config_dir`.
pub fn read_settings(config_dir: &Path, config_path: &Path) -> Result<Settings, StateError> {
    let config_toml = fs::read_to_string(config_path)?;
    let settings: Settings = toml::from_str(&config_toml)?;
    Ok(resolve_paths(config_dir, settings))
}

fn resolve_paths(config_dir: &Path, mut settings: Settings) -> Settings {
    if settings.data_dir.is_relative() {
        settings.data_dir = config_dir.join(&settings.data_dir);
    }
    if let Some(log_dir) = settings.log_dir.as_mut() {
        if log_dir.is_relative() {
            *log_dir = config_dir.join(&*log_dir);
        }
    }
    settings
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("sharedrop directory not initialized. Run 'sharedrop init' first")]
    NotInitialized,

    #[error("sharedrop directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
