//! Wi-Fi discovery
//!
//! Machines broadcast `name,ip,port,busy` on UDP port 3333. The first valid
//! announcement inside the window is returned.

use super::{DiscoveredDevice, Discovery, DiscoveryError};
use crate::config::LinkConfig;
use crate::core::transport::TransportType;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

const ANNOUNCEMENT_MAX: usize = 128;

/// Listens for a machine's broadcast announcement
#[derive(Debug, Clone)]
pub struct NetworkDiscovery {
    bind_address: String,
    port: u16,
    timeout: Duration,
}

impl NetworkDiscovery {
    /// Listen on `bind_address:port` for at most `timeout`
    pub fn new(bind_address: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            timeout,
        }
    }

    /// Use the discovery settings
    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.discovery.bind_address.clone(),
            config.discovery.port,
            config.discovery.timeout(),
        )
    }

    /// Wait on an already bound socket for one announcement.
    ///
    /// Datagrams that are not announcements are logged and skipped until the
    /// window closes.
    pub fn receive_announcement(
        &self,
        socket: &UdpSocket,
    ) -> Result<Option<DiscoveredDevice>, DiscoveryError> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = [0u8; ANNOUNCEMENT_MAX];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket.set_read_timeout(Some(remaining))?;

            match socket.recv_from(&mut buffer) {
                Ok((len, from)) => match parse_announcement(&buffer[..len]) {
                    Ok(device) => {
                        tracing::debug!("Announcement from {}", from);
                        return Ok(Some(device));
                    }
                    Err(e) => tracing::warn!("Ignoring datagram from {}: {}", from, e),
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Discovery for NetworkDiscovery {
    fn find(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        let address = format!("{}:{}", self.bind_address, self.port);
        let socket = UdpSocket::bind(&address).map_err(|source| DiscoveryError::Bind {
            address: address.clone(),
            source,
        })?;
        tracing::debug!("Listening for announcements on {} for {:?}", address, self.timeout);

        Ok(self.receive_announcement(&socket)?.into_iter().collect())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Network
    }
}

/// Parse a `name,ip,port,busy` announcement
pub fn parse_announcement(payload: &[u8]) -> Result<DiscoveredDevice, DiscoveryError> {
    let malformed = || DiscoveryError::MalformedAnnouncement(String::from_utf8_lossy(payload).into_owned());

    let text = std::str::from_utf8(payload).map_err(|_| malformed())?;
    let fields: Vec<&str> = text
        .trim_end_matches(['\0', '\r', '\n'])
        .split(',')
        .map(str::trim)
        .collect();
    let [name, ip, port, busy] = fields.as_slice() else {
        return Err(malformed());
    };

    let port: u16 = port.parse().map_err(|_| malformed())?;
    let busy = match *busy {
        "0" => false,
        "1" => true,
        _ => return Err(malformed()),
    };
    if ip.is_empty() {
        return Err(malformed());
    }

    Ok(DiscoveredDevice {
        name: name.to_string(),
        address: format!("{ip}:{port}"),
        busy,
    })
}
