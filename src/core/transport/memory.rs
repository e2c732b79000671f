//! In-memory transport
//!
//! Serves queued chunks to the reader and records everything written. An
//! optional responder is called for every `send` and its chunks are queued as
//! the device's reply, which is enough to script a half-duplex machine.

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use std::collections::VecDeque;
use std::time::Duration;

/// Callback producing the device's reply chunks for one write
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Scripted transport without any OS handle.
///
/// Reports itself as a network link unless told otherwise with
/// [`MemoryTransport::with_kind`].
pub struct MemoryTransport {
    name: String,
    open: bool,
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<u8>,
    responder: Option<Responder>,
    stats: TransportStats,
    timeout: Duration,
    kind: TransportType,
}

impl MemoryTransport {
    /// Create a closed transport with nothing queued
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            open: false,
            incoming: VecDeque::new(),
            sent: Vec::new(),
            responder: None,
            stats: TransportStats::default(),
            timeout: Duration::from_millis(50),
            kind: TransportType::Network,
        }
    }

    /// Create a transport whose replies come from `responder`
    pub fn with_responder(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        let mut transport = Self::new();
        transport.responder = Some(Box::new(responder));
        transport
    }

    /// Set the name reported by `connection_info`
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the link kind reported by `transport_type`. Defaults to
    /// [`TransportType::Network`].
    #[must_use]
    pub fn with_kind(mut self, kind: TransportType) -> Self {
        self.kind = kind;
        self
    }

    /// Queue a chunk for the reader
    pub fn push_incoming(&mut self, chunk: impl Into<Vec<u8>>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.incoming.push_back(chunk);
        }
    }

    /// Everything written so far
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Take everything written so far
    pub fn take_sent(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }

    /// Number of chunks still queued
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportTrait for MemoryTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotReady);
        }
        self.sent.extend_from_slice(data);
        self.stats.record_sent(data.len());

        if let Some(responder) = self.responder.as_mut() {
            for chunk in responder(data) {
                if !chunk.is_empty() {
                    self.incoming.push_back(chunk);
                }
            }
        }
        Ok(())
    }

    fn receive_into(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotReady);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut chunk = self
            .incoming
            .pop_front()
            .ok_or(TransportError::Timeout(timeout))?;

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.incoming.push_front(chunk.split_off(n));
        }

        self.stats.record_received(n);
        Ok(n)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transport_type(&self) -> TransportType {
        self.kind
    }

    fn connection_info(&self) -> String {
        self.name.clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
