//! Serial port transport implementation

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use serialport::{ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Baud rate of the controller's USB-serial bridge
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read/write timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial port configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read and write timeout
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set read/write timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    /// Wait until all buffered output has been transmitted
    pub fn flush(&mut self) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotReady)?;
        port.flush()?;
        Ok(())
    }

    fn open_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::OpenFailed {
            address: self.config.port.clone(),
            reason: reason.to_string(),
        }
    }
}

impl TransportTrait for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }

        let mut port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(self.config.timeout)
            .open()
            .map_err(|e| self.open_failed(e))?;

        // Drop whatever the controller printed before we attached
        port.clear(ClearBuffer::All).map_err(|e| self.open_failed(e))?;
        port.flush().map_err(|e| self.open_failed(e))?;

        tracing::info!(
            "Opened serial port {} @ {} baud",
            self.config.port,
            self.config.baud_rate
        );

        self.port = Some(port);
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.config.port);
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.config.timeout;
        let port = self.port.as_mut().ok_or(TransportError::NotReady)?;

        port.write_all(data)
            .map_err(|e| TransportError::from_read(e, timeout))?;
        port.flush().map_err(|e| TransportError::from_read(e, timeout))?;

        self.stats.record_sent(data.len());
        Ok(())
    }

    fn receive_into(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotReady)?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::Io(e.into()))?;

        match port.read(buf) {
            Ok(0) => Err(TransportError::Timeout(timeout)),
            Ok(n) => {
                self.stats.record_received(n);
                Ok(n)
            }
            Err(e) => Err(TransportError::from_read(e, timeout)),
        }
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        self.config.port.clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone().with_uptime(self.connected_at)
    }
}
