//! Device discovery
//!
//! Finds machines before a connection is opened: attached USB serial bridges
//! by vendor/product id, and Wi-Fi machines by their UDP announcement.

mod network;
mod serial;

pub use network::{parse_announcement, NetworkDiscovery};
pub use serial::SerialDiscovery;

use super::transport::TransportType;
use crate::config::LinkConfig;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A machine found by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Name reported by the machine or the USB descriptor
    pub name: String,
    /// Device path or `ip:port`, usable with `ConnectionAddress::parse`
    pub address: String,
    /// Machine is running a job or held by another client
    pub busy: bool,
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)?;
        if self.busy {
            write!(f, " [busy]")?;
        }
        Ok(())
    }
}

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The OS refused to list serial ports
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(String),

    /// The announcement port could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Local address
        address: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Socket failure while listening
    #[error("Discovery I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram was not `name,ip,port,busy`
    #[error("Malformed announcement: {0:?}")]
    MalformedAnnouncement(String),
}

/// One way of finding machines
pub trait Discovery {
    /// Look for machines, blocking at most for the configured window
    fn find(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError>;

    /// Kind of link the found addresses need
    fn transport_type(&self) -> TransportType;
}

/// Run serial then network discovery and concatenate the results.
///
/// A finder that fails is logged and skipped so the others still report.
pub fn find_all(config: &LinkConfig) -> Vec<DiscoveredDevice> {
    let finders: [Box<dyn Discovery>; 2] = [
        Box::new(SerialDiscovery::from_config(config)),
        Box::new(NetworkDiscovery::from_config(config)),
    ];
    collect(&finders)
}

fn collect(finders: &[Box<dyn Discovery>]) -> Vec<DiscoveredDevice> {
    let mut devices = Vec::new();
    for finder in finders {
        match finder.find() {
            Ok(found) => {
                tracing::info!("Found {} {} device(s)", found.len(), finder.transport_type());
                devices.extend(found);
            }
            Err(e) => tracing::warn!("{} discovery failed: {}", finder.transport_type(), e),
        }
    }
    devices
}
