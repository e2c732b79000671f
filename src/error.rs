//! Crate-level error

use crate::config::ConfigError;
use crate::core::command::ParseError;
use crate::core::discovery::DiscoveryError;
use crate::core::transfer::TransferError;
use crate::core::transport::TransportError;
use thiserror::Error;

/// Any failure surfaced by this crate
#[derive(Error, Debug)]
pub enum Error {
    /// Link failure, including use of a closed connection
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Block transfer failure
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Malformed directory listing
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Device discovery failure
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias using [`enum@Error`]
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check whether the operation failed because the connection was not open
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::NotReady)
                | Error::Transfer(TransferError::Transport(TransportError::NotReady))
        )
    }
}
