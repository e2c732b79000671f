//! File Transfer Protocol
//!
//! Moves files over the half-duplex link with an XMODEM-family block
//! transfer:
//! - 128 byte (SOH), 1 KiB and 8 KiB (STX) blocks
//! - CRC-16 or 8-bit sum per block, chosen by the receiver
//! - stop-and-wait with retransmission up to a retry ceiling
//! - CAN aborts from either side, EOT ends the transfer
//!
//! Uploads prefix the payload with the file's MD5 digest as 32 hex characters
//! so the machine can verify what it stored.

pub mod checksum;
mod xmodem;

pub use checksum::{crc16_xmodem, md5_hex, sum8_checksum, BlockCheck, Md5Stream, MD5_HEX_LEN};
pub use xmodem::{encode_block, ReceiverState, SenderState, XmodemReceiver, XmodemSender};

use super::transport::{TransportError, TransportTrait};
use crate::config::secs;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// XMODEM constants
pub(crate) const SOH: u8 = 0x01; // Start of Header (128 byte block)
pub(crate) const STX: u8 = 0x02; // Start of Text (1K/8K block)
/// End of Transmission, also terminates text responses
pub const EOT: u8 = 0x04;
pub(crate) const ACK: u8 = 0x06; // Acknowledge
pub(crate) const NAK: u8 = 0x15; // Negative Acknowledge
pub(crate) const CAN: u8 = 0x18; // Cancel
pub(crate) const SUB: u8 = 0x1A; // Padding character (Ctrl-Z)
pub(crate) const CRC_MODE: u8 = 0x43; // 'C' for CRC mode

/// Block size variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockSize {
    /// Original XMODEM, 128 bytes, SOH header
    #[serde(rename = "128")]
    Standard,
    /// XMODEM-1K, STX header
    #[serde(rename = "1k")]
    OneK,
    /// XMODEM-8K, STX header
    #[default]
    #[serde(rename = "8k")]
    EightK,
}

impl BlockSize {
    /// Payload bytes per block
    pub fn size(&self) -> usize {
        match self {
            BlockSize::Standard => 128,
            BlockSize::OneK => 1024,
            BlockSize::EightK => 8192,
        }
    }

    /// Header byte announcing this block size
    pub fn header(&self) -> u8 {
        match self {
            BlockSize::Standard => SOH,
            BlockSize::OneK | BlockSize::EightK => STX,
        }
    }
}

/// Block transfer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Block size used when sending
    pub block_size: BlockSize,
    /// Retransmissions allowed per block before the transfer is aborted
    pub max_retries: u32,
    /// How long the sender waits for the receiver's start byte, in seconds
    pub start_timeout_secs: f64,
    /// How long the sender waits for an ACK/NAK, in seconds
    pub ack_timeout_secs: f64,
    /// How long the receiver waits for a block, in seconds
    pub block_timeout_secs: f64,
    /// Start receiving in CRC mode ('C') instead of checksum mode (NAK)
    pub use_crc: bool,
    /// Treat the first 32 bytes of a download as the MD5 of the rest
    pub verify_downloads: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::EightK,
            max_retries: 16,
            start_timeout_secs: 60.0,
            ack_timeout_secs: 10.0,
            block_timeout_secs: 10.0,
            use_crc: true,
            verify_downloads: false,
        }
    }
}

impl TransferConfig {
    /// Wait for the receiver's start byte
    pub fn start_timeout(&self) -> Duration {
        secs(self.start_timeout_secs, Duration::from_secs(60))
    }

    /// Wait for an ACK/NAK
    pub fn ack_timeout(&self) -> Duration {
        secs(self.ack_timeout_secs, Duration::from_secs(10))
    }

    /// Wait for a block
    pub fn block_timeout(&self) -> Duration {
        secs(self.block_timeout_secs, Duration::from_secs(10))
    }
}

/// Why a transfer was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The other side sent CAN
    RemoteCancel,
    /// A block (or the EOT) was retransmitted too often
    RetryLimit {
        /// Block sequence number that failed, 0 for the EOT
        block: u32,
    },
    /// The receiver never sent a start byte
    NoReceiver,
    /// The sender never sent a block
    NoSender,
    /// The receiver cancelled after the final block, refusing the content
    Rejected,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteCancel => write!(f, "cancelled by remote"),
            Self::RetryLimit { block } => write!(f, "retry limit exceeded at block {block}"),
            Self::NoReceiver => write!(f, "receiver never started"),
            Self::NoSender => write!(f, "sender never started"),
            Self::Rejected => write!(f, "content rejected by receiver"),
        }
    }
}

/// File transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Upload source does not exist
    #[error("Upload file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    /// Content digest did not match
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest announced by the sender
        expected: String,
        /// Digest of the data that arrived
        actual: String,
    },

    /// Transfer was cancelled or exceeded its retry ceiling
    #[error("Transfer aborted: {0}")]
    Aborted(AbortReason),

    /// Local file could not be read or written
    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    /// Link failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of the whole-file checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// Digest prefixed to an upload for the machine to verify
    Sent(String),
    /// Digest received with a download and matched locally
    Verified(String),
    /// Download without verification
    Unverified,
}

/// Successful transfer summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// File bytes moved, excluding any digest prefix and padding
    pub bytes: u64,
    /// Blocks acknowledged
    pub blocks: u32,
    /// Retransmissions over the whole transfer
    pub retries: u32,
    /// Whole-file checksum outcome
    pub checksum: ChecksumStatus,
}

/// Block-level progress, reported through tracing while a transfer runs
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    /// Total payload size if known
    pub total_bytes: Option<u64>,
    /// Payload bytes acknowledged or stored
    pub bytes_transferred: u64,
    /// Blocks acknowledged or stored
    pub blocks: u32,
    /// Retransmissions so far
    pub retries: u32,
}

impl TransferProgress {
    /// Get percentage complete
    pub fn percent(&self) -> f32 {
        match self.total_bytes {
            Some(total) if total > 0 => (self.bytes_transferred as f32 / total as f32) * 100.0,
            _ => 0.0,
        }
    }
}

/// Upload a local file, prefixed with its MD5 digest.
///
/// Fails with [`TransferError::LocalFileNotFound`] before touching the link if
/// the file is missing.
pub fn upload(
    transport: &mut dyn TransportTrait,
    path: &Path,
    config: &TransferConfig,
) -> Result<TransferResult, TransferError> {
    if !path.is_file() {
        return Err(TransferError::LocalFileNotFound(path.to_path_buf()));
    }

    let data = std::fs::read(path)?;
    let digest = md5_hex(&data);
    tracing::info!(
        "Uploading {} ({} bytes, md5 {})",
        path.display(),
        data.len(),
        digest
    );

    let mut payload = Vec::with_capacity(MD5_HEX_LEN + data.len());
    payload.extend_from_slice(digest.as_bytes());
    payload.extend_from_slice(&data);

    let progress = match XmodemSender::new(config.clone()).run(transport, &payload) {
        Err(TransferError::Aborted(AbortReason::Rejected)) => {
            return Err(TransferError::ChecksumMismatch {
                expected: digest,
                actual: "rejected by machine".to_string(),
            });
        }
        outcome => outcome?,
    };

    Ok(TransferResult {
        bytes: data.len() as u64,
        blocks: progress.blocks,
        retries: progress.retries,
        checksum: ChecksumStatus::Sent(digest),
    })
}

/// Download into a local file, writing blocks as they arrive.
///
/// With `verify_downloads` the payload's first 32 bytes are taken as the MD5
/// of the rest. The local file is removed if the transfer fails.
pub fn download(
    transport: &mut dyn TransportTrait,
    path: &Path,
    config: &TransferConfig,
) -> Result<TransferResult, TransferError> {
    let file = File::create(path)?;
    download_into(transport, file, path, config)
}

/// Download into `file`, already created at `path`.
///
/// Lets a caller fail on the local side before asking the machine to send.
/// `path` is removed if the transfer fails.
pub fn download_into(
    transport: &mut dyn TransportTrait,
    file: File,
    path: &Path,
    config: &TransferConfig,
) -> Result<TransferResult, TransferError> {
    tracing::info!("Downloading into {}", path.display());

    let outcome = receive_into_file(transport, file, config);
    if outcome.is_err() {
        std::fs::remove_file(path).ok();
    }
    outcome
}

fn receive_into_file(
    transport: &mut dyn TransportTrait,
    file: File,
    config: &TransferConfig,
) -> Result<TransferResult, TransferError> {
    let mut sink = DigestSink::new(BufWriter::new(file), config.verify_downloads);
    let progress = XmodemReceiver::new(config.clone()).run(transport, &mut sink)?;
    let (bytes, checksum) = sink.finish()?;

    Ok(TransferResult {
        bytes,
        blocks: progress.blocks,
        retries: progress.retries,
        checksum,
    })
}

/// Writer that optionally peels a digest prefix off the stream and checks it
struct DigestSink<W: Write> {
    inner: W,
    verify: bool,
    prefix: Vec<u8>,
    digest: Md5Stream,
    written: u64,
}

impl<W: Write> DigestSink<W> {
    fn new(inner: W, verify: bool) -> Self {
        Self {
            inner,
            verify,
            prefix: Vec::with_capacity(MD5_HEX_LEN),
            digest: Md5Stream::new(),
            written: 0,
        }
    }

    fn finish(mut self) -> Result<(u64, ChecksumStatus), TransferError> {
        self.inner.flush()?;
        if !self.verify {
            return Ok((self.written, ChecksumStatus::Unverified));
        }

        let expected = String::from_utf8_lossy(&self.prefix).to_ascii_lowercase();
        let actual = self.digest.finish_hex();
        if expected != actual {
            return Err(TransferError::ChecksumMismatch { expected, actual });
        }
        tracing::debug!("Download checksum verified ({})", actual);
        Ok((self.written, ChecksumStatus::Verified(actual)))
    }
}

impl<W: Write> Write for DigestSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut rest = buf;
        if self.verify && self.prefix.len() < MD5_HEX_LEN {
            let take = (MD5_HEX_LEN - self.prefix.len()).min(rest.len());
            self.prefix.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        if !rest.is_empty() {
            self.inner.write_all(rest)?;
            self.digest.update(rest);
            self.written += rest.len() as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
