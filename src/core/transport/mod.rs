//! Transport layer for the two machine link types
//!
//! Supports:
//! - Serial ports (USB-serial bridge on the controller board)
//! - Raw TCP connections (Wi-Fi module)
//! - An in-memory transport for tests and device simulators
//!
//! Every transport is blocking: a call waits at most for the timeout it is
//! given and then reports [`TransportError::Timeout`].

mod memory;
mod serial;
mod tcp;

pub use memory::{MemoryTransport, Responder};
pub use serial::{SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

use crate::config::LinkConfig;
use bytes::Bytes;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Size of a single chunk pulled off the wire by [`TransportTrait::receive`]
pub const RECEIVE_CHUNK: usize = 4096;

/// Transport configuration, one variant per link type
#[derive(Debug, Clone)]
pub enum Transport {
    /// Serial port connection
    Serial(SerialConfig),
    /// TCP connection to the Wi-Fi module
    Network(TcpConfig),
}

impl Transport {
    /// Build the transport configuration for a parsed address
    pub fn from_address(address: &ConnectionAddress, config: &LinkConfig) -> Self {
        match address {
            ConnectionAddress::Serial(path) => Self::Serial(
                SerialConfig::new(path, config.serial.baud_rate).timeout(config.serial.timeout()),
            ),
            ConnectionAddress::Network { host, port } => {
                Self::Network(TcpConfig::new(host, *port).timeout(config.network.timeout()))
            }
        }
    }

    /// Get the type of link this configuration opens
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Serial(_) => TransportType::Serial,
            Self::Network(_) => TransportType::Network,
        }
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// TCP socket
    Network,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Network => write!(f, "Network"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation attempted on a transport that is not open
    #[error("Connection not ready: did you open the device?")]
    NotReady,

    /// Device or socket could not be opened
    #[error("Failed to open {address}: {reason}")]
    OpenFailed {
        /// Device path or host:port
        address: String,
        /// OS-level reason
        reason: String,
    },

    /// Address is neither an existing device path nor host:port
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Nothing arrived within the configured window
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Remote end closed the connection
    #[error("Disconnected")]
    Disconnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Classify an I/O error raised while waiting for data
    pub(crate) fn from_read(err: std::io::Error, timeout: Duration) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout(timeout),
            _ => Self::Io(err),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Write calls
    pub packets_sent: u64,
    /// Read calls that returned data
    pub packets_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

impl TransportStats {
    pub(crate) fn record_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.packets_sent += 1;
    }

    pub(crate) fn record_received(&mut self, len: usize) {
        self.bytes_received += len as u64;
        self.packets_received += 1;
    }

    pub(crate) fn with_uptime(mut self, connected_at: Option<Instant>) -> Self {
        if let Some(connected_at) = connected_at {
            self.uptime_secs = connected_at.elapsed().as_secs();
        }
        self
    }
}

/// Byte-oriented duplex channel to the machine
///
/// Implementations own the OS handle. `send` and `receive_into` must fail with
/// [`TransportError::NotReady`] while the transport is closed.
#[cfg_attr(test, mockall::automock)]
pub trait TransportTrait: Send {
    /// Open the underlying device or socket
    fn open(&mut self) -> Result<(), TransportError>;

    /// Close the underlying device or socket
    fn close(&mut self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Write all of `data`
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Block until at least one byte is available or `timeout` elapses.
    ///
    /// Returns the number of bytes placed in `buf` (never zero on success).
    fn receive_into(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Default timeout configured for this link
    fn timeout(&self) -> Duration;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Device path or host:port
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;

    /// Receive one chunk of at most [`RECEIVE_CHUNK`] bytes
    fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let mut buffer = vec![0u8; RECEIVE_CHUNK];
        let n = self.receive_into(&mut buffer, timeout)?;
        buffer.truncate(n);
        Ok(Bytes::from(buffer))
    }

    /// Receive a single byte
    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        let mut byte = [0u8; 1];
        self.receive_into(&mut byte, timeout)?;
        Ok(byte[0])
    }

    /// Fill `buf` completely, giving up once `timeout` has elapsed in total
    fn read_exact_within(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }
            filled += self.receive_into(&mut buf[filled..], remaining)?;
        }
        Ok(())
    }
}

/// Create a transport instance from configuration. The transport is not opened.
pub fn create_transport(config: Transport) -> Box<dyn TransportTrait> {
    match config {
        Transport::Serial(cfg) => Box::new(SerialTransport::new(cfg)),
        Transport::Network(cfg) => Box::new(TcpTransport::new(cfg)),
    }
}

/// Caller-supplied machine address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddress {
    /// Local serial device path
    Serial(String),
    /// TCP endpoint
    Network {
        /// Host name or IPv4 address
        host: String,
        /// TCP port
        port: u16,
    },
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<host>(?:\d{1,3}\.){3}\d{1,3})(?::(?P<port>\d{1,5}))?$")
            .expect("valid IPv4 address pattern")
    })
}

fn host_port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<host>[A-Za-z0-9][A-Za-z0-9.\-]*):(?P<port>\d{1,5})$")
            .expect("valid host:port pattern")
    })
}

impl ConnectionAddress {
    /// Parse an address.
    ///
    /// An existing filesystem path is a serial device. `a.b.c.d[:port]` and
    /// `host:port` are network endpoints; a missing port means `default_port`.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, TransportError> {
        let address = address.trim();
        if !address.is_empty() && Path::new(address).exists() {
            return Ok(Self::Serial(address.to_string()));
        }

        let captures = ipv4_pattern()
            .captures(address)
            .or_else(|| host_port_pattern().captures(address))
            .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;

        let port = match captures.name("port") {
            Some(port) => port
                .as_str()
                .parse::<u16>()
                .map_err(|_| TransportError::InvalidAddress(address.to_string()))?,
            None => default_port,
        };

        Ok(Self::Network {
            host: captures["host"].to_string(),
            port,
        })
    }

    /// Get the type of link this address needs
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Serial(_) => TransportType::Serial,
            Self::Network { .. } => TransportType::Network,
        }
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "{path}"),
            Self::Network { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
