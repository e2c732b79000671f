//! # Carvera Link Core Library
//!
//! Connectivity layer for Carvera desktop CNC machines:
//! - USB serial and Wi-Fi (TCP) transports behind one trait
//! - Discovery of attached and announcing machines
//! - Escaped line commands and directory listing parsing
//! - XMODEM-8K file upload and download with MD5 verification
//!
//! ## Example
//!
//! ```rust,no_run
//! use carvera_core::{LinkConfig, Machine};
//!
//! fn main() -> carvera_core::Result<()> {
//!     let config = LinkConfig::load()?;
//!     let mut machine = Machine::open("192.168.1.50:2222", &config)?;
//!
//!     for file in machine.list_gcode_files()? {
//!         println!("{file}");
//!     }
//!     machine.upload_file(std::path::Path::new("part.nc"))?;
//!     machine.close()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod error;
pub mod utils;

// Re-exports for convenience
pub use crate::config::{LinkConfig, LoggingConfig};
pub use crate::core::command::{escape, parse_listing, unescape, ParseError, RemoteFileEntry};
pub use crate::core::connection::{Connection, ReadyState};
pub use crate::core::discovery::{DiscoveredDevice, Discovery, DiscoveryError};
pub use crate::core::machine::Machine;
pub use crate::core::transfer::{
    AbortReason, BlockSize, ChecksumStatus, TransferConfig, TransferError, TransferResult,
};
pub use crate::core::transport::{
    ConnectionAddress, MemoryTransport, SerialConfig, TcpConfig, Transport, TransportError,
    TransportTrait, TransportType,
};
pub use crate::error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
