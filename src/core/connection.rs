//! Connection handle
//!
//! Owns one transport and gates every command and transfer on the handle
//! being open. Operations borrow the transport for a single call; `&mut self`
//! keeps the half-duplex link to one request in flight.

use super::command;
use super::transfer::{self, TransferConfig, TransferError, TransferResult};
use super::transport::{
    create_transport, ConnectionAddress, Transport, TransportError, TransportStats, TransportTrait,
    TransportType,
};
use crate::config::LinkConfig;
use std::fs::File;
use std::path::Path;

/// Whether the handle may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not opened yet, or closed
    Closed,
    /// Open and usable
    Open,
}

/// One open link to a machine
pub struct Connection {
    transport: Box<dyn TransportTrait>,
    state: ReadyState,
    transfer: TransferConfig,
}

impl Connection {
    /// Wrap a transport. The connection starts closed.
    pub fn new(transport: Box<dyn TransportTrait>, transfer: TransferConfig) -> Self {
        Self {
            transport,
            state: ReadyState::Closed,
            transfer,
        }
    }

    /// Parse `address`, build the matching transport and open it
    pub fn open_address(address: &str, config: &LinkConfig) -> Result<Self, TransportError> {
        let address = ConnectionAddress::parse(address, config.network.port)?;
        let transport = create_transport(Transport::from_address(&address, config));
        let mut connection = Self::new(transport, config.transfer.clone());
        connection.open()?;
        Ok(connection)
    }

    /// Open the transport. Opening an open connection does nothing.
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.state == ReadyState::Open {
            return Ok(());
        }
        self.transport.open()?;
        self.state = ReadyState::Open;
        tracing::debug!(
            "Connection ready: {} over {}",
            self.transport.connection_info(),
            self.transport.transport_type()
        );
        Ok(())
    }

    /// Close the transport
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.state == ReadyState::Closed {
            return Ok(());
        }
        self.state = ReadyState::Closed;
        tracing::debug!("Closing connection to {}", self.transport.connection_info());
        self.transport.close()
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), TransportError> {
        match self.state {
            ReadyState::Open => Ok(()),
            ReadyState::Closed => Err(TransportError::NotReady),
        }
    }

    /// Send a command line
    pub fn send(&mut self, command: &str) -> Result<(), TransportError> {
        self.ensure_ready()?;
        command::send_command(self.transport.as_mut(), command)
    }

    /// Send raw bytes
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_ready()?;
        self.transport.send(data)
    }

    /// Read one EOT-terminated response
    pub fn receive(&mut self) -> Result<String, TransportError> {
        self.ensure_ready()?;
        let timeout = self.transport.timeout();
        command::receive_response(self.transport.as_mut(), timeout)
    }

    /// Read one response as lines
    pub fn receive_lines(&mut self) -> Result<Vec<String>, TransportError> {
        self.ensure_ready()?;
        let timeout = self.transport.timeout();
        command::receive_lines(self.transport.as_mut(), timeout)
    }

    /// Send `path` with the block transfer; the machine must already expect it
    pub fn upload(&mut self, path: &Path) -> Result<TransferResult, TransferError> {
        self.ensure_ready()?;
        transfer::upload(self.transport.as_mut(), path, &self.transfer)
    }

    /// Receive a block transfer into `path`
    pub fn download(&mut self, path: &Path) -> Result<TransferResult, TransferError> {
        self.ensure_ready()?;
        transfer::download(self.transport.as_mut(), path, &self.transfer)
    }

    /// Receive a block transfer into `file`, which was created at `path`
    pub fn download_into(&mut self, file: File, path: &Path) -> Result<TransferResult, TransferError> {
        self.ensure_ready()?;
        transfer::download_into(self.transport.as_mut(), file, path, &self.transfer)
    }

    /// Current state
    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    /// Check if open
    pub fn is_ready(&self) -> bool {
        self.state == ReadyState::Open
    }

    /// Kind of link
    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    /// Device path or host:port
    pub fn address(&self) -> String {
        self.transport.connection_info()
    }

    /// Transport counters
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Block transfer settings
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.transfer
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state == ReadyState::Open {
            if let Err(e) = self.close() {
                tracing::warn!("Error closing connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{MemoryTransport, MockTransportTrait};

    fn untouched_mock() -> MockTransportTrait {
        let mut mock = MockTransportTrait::new();
        mock.expect_send().never();
        mock.expect_receive_into().never();
        mock.expect_receive().never();
        mock.expect_read_byte().never();
        mock.expect_open().never();
        mock.expect_close().never();
        mock
    }

    #[test]
    fn test_closed_connection_never_touches_transport() {
        let mut connection = Connection::new(Box::new(untouched_mock()), TransferConfig::default());

        assert_eq!(connection.ready_state(), ReadyState::Closed);
        assert!(matches!(connection.send("ls"), Err(TransportError::NotReady)));
        assert!(matches!(connection.send_bytes(b"?"), Err(TransportError::NotReady)));
        assert!(matches!(connection.receive(), Err(TransportError::NotReady)));
        assert!(matches!(connection.receive_lines(), Err(TransportError::NotReady)));
        assert!(matches!(
            connection.upload(Path::new("part.nc")),
            Err(TransferError::Transport(TransportError::NotReady))
        ));
        assert!(matches!(
            connection.download(Path::new("part.nc")),
            Err(TransferError::Transport(TransportError::NotReady))
        ));
        assert!(connection.close().is_ok());
    }

    #[test]
    fn test_open_close_lifecycle() {
        let mut mock = MockTransportTrait::new();
        mock.expect_open().times(1).returning(|| Ok(()));
        mock.expect_close().times(1).returning(|| Ok(()));
        mock.expect_connection_info()
            .returning(|| "192.168.1.50:2222".to_string());
        mock.expect_transport_type().returning(|| TransportType::Network);
        mock.expect_send()
            .withf(|data: &[u8]| data == b"version\n")
            .times(1)
            .returning(|_| Ok(()));

        let mut connection = Connection::new(Box::new(mock), TransferConfig::default());
        connection.open().unwrap();
        connection.open().unwrap();
        assert!(connection.is_ready());
        connection.send("version").unwrap();

        connection.close().unwrap();
        assert_eq!(connection.ready_state(), ReadyState::Closed);
        assert!(matches!(connection.send("version"), Err(TransportError::NotReady)));
    }

    #[test]
    fn test_open_failure_stays_closed() {
        let mut mock = MockTransportTrait::new();
        mock.expect_open().returning(|| {
            Err(TransportError::OpenFailed {
                address: "/dev/ttyUSB0".to_string(),
                reason: "busy".to_string(),
            })
        });

        let mut connection = Connection::new(Box::new(mock), TransferConfig::default());
        assert!(matches!(connection.open(), Err(TransportError::OpenFailed { .. })));
        assert_eq!(connection.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_drop_closes_open_connection() {
        let mut mock = MockTransportTrait::new();
        mock.expect_open().returning(|| Ok(()));
        mock.expect_close().times(1).returning(|| Ok(()));
        mock.expect_connection_info().returning(|| "mock".to_string());
        mock.expect_transport_type().returning(|| TransportType::Serial);

        let mut connection = Connection::new(Box::new(mock), TransferConfig::default());
        connection.open().unwrap();
        drop(connection);
    }

    #[test]
    fn test_receive_uses_command_framing() {
        let transport = MemoryTransport::with_responder(|line| {
            if line == b"version\n" {
                vec![b"version = 1.0.5\n\x04".to_vec()]
            } else {
                Vec::new()
            }
        });

        let mut connection = Connection::new(Box::new(transport), TransferConfig::default());
        connection.open().unwrap();
        connection.send("version").unwrap();
        assert_eq!(connection.receive_lines().unwrap(), vec!["version = 1.0.5"]);
        assert_eq!(connection.transport_type(), TransportType::Network);
        assert_eq!(connection.stats().bytes_sent, 8);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        assert!(matches!(
            Connection::open_address("not an address", &LinkConfig::default()),
            Err(TransportError::InvalidAddress(_))
        ));
    }
}
