//! Configuration module
//!
//! Handles timeouts, ports, retry ceilings and logging settings

mod settings;

pub use settings::{
    DiscoverySettings, LinkConfig, LogFormat, LoggingConfig, NetworkSettings, SerialSettings,
    REMOTE_GCODE_DIR,
};

pub(crate) use settings::secs;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home/config directory could be determined
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this layout
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "carvera-link", "Carvera Link")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of `config.toml` inside [`config_dir`]
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
