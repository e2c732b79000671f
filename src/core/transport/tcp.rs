//! TCP transport implementation

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// TCP port the Wi-Fi module listens on
pub const DEFAULT_PORT: u16 = 2222;

/// Default connect and read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

// set_read_timeout rejects a zero duration
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// TCP connection configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connect, read and write timeout
    pub timeout: Duration,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = self.config.address();
        let open_failed = |reason: String| TransportError::OpenFailed {
            address: addr.clone(),
            reason,
        };

        let candidates = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| open_failed(e.to_string()))?;

        let mut last_error = format!("no addresses resolved for {}", self.config.host);
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.config.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", candidate, e);
                    last_error = e.to_string();
                }
            }
        }
        Err(open_failed(last_error))
    }
}

impl TransportTrait for TcpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.connect()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.config.timeout.max(MIN_READ_TIMEOUT)))?;
        stream.set_write_timeout(Some(self.config.timeout.max(MIN_READ_TIMEOUT)))?;

        tracing::info!("Connected to {}", self.config.address());

        self.stream = Some(stream);
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
            tracing::info!("Disconnected from {}", self.config.address());
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.config.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotReady)?;

        stream
            .write_all(data)
            .map_err(|e| TransportError::from_read(e, timeout))?;
        stream.flush()?;

        self.stats.record_sent(data.len());
        Ok(())
    }

    fn receive_into(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotReady)?;
        stream.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;

        match stream.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
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
        TransportType::Network
    }

    fn connection_info(&self) -> String {
        self.config.address()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone().with_uptime(self.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_send_and_receive_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(b"ok\x04").unwrap();
            buf
        });

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port));
        transport.open().unwrap();
        transport.send(b"?\r\n").unwrap();

        let mut reply = [0u8; 3];
        transport
            .read_exact_within(&mut reply, Duration::from_secs(2))
            .unwrap();
        assert_eq!(&reply, b"ok\x04");
        assert_eq!(&server.join().unwrap(), b"?\r\n");

        let stats = transport.stats();
        assert_eq!(stats.bytes_sent, 3);
        assert_eq!(stats.bytes_received, 3);

        transport.close().unwrap();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_receive_times_out_when_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(socket);
        });

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port));
        transport.open().unwrap();
        assert!(matches!(
            transport.receive(Duration::from_millis(50)),
            Err(TransportError::Timeout(_))
        ));
    }

    #[test]
    fn test_refused_connection_is_open_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port));
        assert!(matches!(
            transport.open(),
            Err(TransportError::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_closed_socket_is_not_ready() {
        let mut transport = TcpTransport::new(TcpConfig::default());
        assert!(matches!(transport.send(b"x"), Err(TransportError::NotReady)));
    }
}
