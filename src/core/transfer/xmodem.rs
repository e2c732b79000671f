//! XMODEM sender and receiver state machines
//!
//! Both sides are driven by an explicit state enum; each loop iteration
//! performs the I/O for one state and returns the next one.

use super::checksum::BlockCheck;
use super::{
    AbortReason, BlockSize, TransferConfig, TransferError, TransferProgress, ACK, CAN, CRC_MODE,
    EOT, NAK, SOH, STX, SUB,
};
use crate::core::transport::{TransportError, TransportTrait};
use std::io::Write;
use std::time::{Duration, Instant};

// Quiet period that ends a line purge after garbage
const PURGE_WINDOW: Duration = Duration::from_millis(100);

/// Encode one block: header, sequence, complement, padded payload, trailer
pub fn encode_block(block_size: BlockSize, check: BlockCheck, sequence: u8, data: &[u8]) -> Vec<u8> {
    let size = block_size.size();
    let mut packet = Vec::with_capacity(size + 3 + check.size());

    packet.push(block_size.header());
    packet.push(sequence);
    packet.push(!sequence);

    let start = packet.len();
    packet.extend_from_slice(&data[..data.len().min(size)]);
    packet.resize(start + size, SUB);

    let trailer = check.calculate(&packet[start..]);
    packet.extend_from_slice(&trailer);
    packet
}

fn sequence_for(index: usize) -> u8 {
    // Blocks are numbered from 1 and wrap at 256
    ((index + 1) % 256) as u8
}

/// Sender-side transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Not started
    Idle,
    /// Waiting for the receiver's 'C' or NAK
    WaitStart,
    /// About to transmit block `block` (0-based)
    Sending {
        /// Block index
        block: usize,
        /// Retransmissions of this block so far
        retries: u32,
    },
    /// Block transmitted, waiting for ACK/NAK
    WaitAck {
        /// Block index
        block: usize,
        /// Retransmissions of this block so far
        retries: u32,
    },
    /// All blocks acknowledged, about to send EOT
    SendEot {
        /// EOT retransmissions so far
        retries: u32,
    },
    /// EOT sent, waiting for the final ACK
    WaitEotAck {
        /// EOT retransmissions so far
        retries: u32,
    },
    /// Transfer complete
    Done,
    /// Transfer abandoned
    Aborted(AbortReason),
}

/// Sending side of the block transfer
pub struct XmodemSender {
    config: TransferConfig,
    check: BlockCheck,
    state: SenderState,
}

impl XmodemSender {
    /// Create a sender for one transfer
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            check: BlockCheck::Crc16,
            state: SenderState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Block check negotiated with the receiver
    pub fn block_check(&self) -> BlockCheck {
        self.check
    }

    /// Drive the transfer of `payload` to completion
    pub fn run(
        &mut self,
        transport: &mut dyn TransportTrait,
        payload: &[u8],
    ) -> Result<TransferProgress, TransferError> {
        let block_size = self.config.block_size;
        let blocks: Vec<&[u8]> = payload.chunks(block_size.size()).collect();
        let mut progress = TransferProgress {
            total_bytes: Some(payload.len() as u64),
            ..TransferProgress::default()
        };
        let start_deadline = Instant::now() + self.config.start_timeout();

        loop {
            let next = match self.state {
                SenderState::Idle => SenderState::WaitStart,

                SenderState::WaitStart => self.wait_start(transport, start_deadline)?,

                SenderState::Sending { block, retries } => match blocks.get(block) {
                    Some(chunk) => {
                        let packet = encode_block(block_size, self.check, sequence_for(block), chunk);
                        transport.send(&packet)?;
                        SenderState::WaitAck { block, retries }
                    }
                    None => SenderState::SendEot { retries: 0 },
                },

                SenderState::WaitAck { block, retries } => match self.read_reply(transport)? {
                    Some(ACK) => {
                        progress.blocks += 1;
                        progress.bytes_transferred += blocks[block].len() as u64;
                        tracing::debug!(
                            "Block {} acknowledged ({}/{} bytes)",
                            block + 1,
                            progress.bytes_transferred,
                            payload.len()
                        );
                        SenderState::Sending {
                            block: block + 1,
                            retries: 0,
                        }
                    }
                    Some(CAN) => SenderState::Aborted(AbortReason::RemoteCancel),
                    reply => {
                        progress.retries += 1;
                        tracing::warn!(
                            "Block {} not acknowledged ({}), retry {}",
                            block + 1,
                            describe(reply),
                            retries + 1
                        );
                        if retries + 1 > self.config.max_retries {
                            SenderState::Aborted(AbortReason::RetryLimit {
                                block: block as u32 + 1,
                            })
                        } else {
                            SenderState::Sending {
                                block,
                                retries: retries + 1,
                            }
                        }
                    }
                },

                SenderState::SendEot { retries } => {
                    transport.send(&[EOT])?;
                    SenderState::WaitEotAck { retries }
                }

                SenderState::WaitEotAck { retries } => match self.read_reply(transport)? {
                    Some(ACK) => SenderState::Done,
                    Some(CAN) => SenderState::Aborted(AbortReason::Rejected),
                    _ if retries + 1 > self.config.max_retries => {
                        SenderState::Aborted(AbortReason::RetryLimit { block: 0 })
                    }
                    _ => {
                        progress.retries += 1;
                        SenderState::SendEot {
                            retries: retries + 1,
                        }
                    }
                },

                SenderState::Done => {
                    tracing::info!(
                        "Sent {} bytes in {} blocks ({} retries)",
                        progress.bytes_transferred,
                        progress.blocks,
                        progress.retries
                    );
                    return Ok(progress);
                }

                SenderState::Aborted(reason) => {
                    tracing::warn!("Send aborted: {}", reason);
                    if !matches!(reason, AbortReason::RemoteCancel | AbortReason::Rejected) {
                        transport.send(&[CAN, CAN]).ok();
                    }
                    return Err(TransferError::Aborted(reason));
                }
            };
            self.state = next;
        }
    }

    fn wait_start(
        &mut self,
        transport: &mut dyn TransportTrait,
        deadline: Instant,
    ) -> Result<SenderState, TransferError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(SenderState::Aborted(AbortReason::NoReceiver));
        }

        match transport.read_byte(remaining) {
            Ok(CRC_MODE) => {
                self.check = BlockCheck::Crc16;
                Ok(SenderState::Sending { block: 0, retries: 0 })
            }
            Ok(NAK) => {
                self.check = BlockCheck::Sum8;
                Ok(SenderState::Sending { block: 0, retries: 0 })
            }
            Ok(CAN) => Ok(SenderState::Aborted(AbortReason::RemoteCancel)),
            Ok(other) => {
                tracing::trace!("Ignoring {:#04x} while waiting for receiver", other);
                Ok(SenderState::WaitStart)
            }
            Err(TransportError::Timeout(_)) => Ok(SenderState::Aborted(AbortReason::NoReceiver)),
            Err(e) => Err(e.into()),
        }
    }

    fn read_reply(&self, transport: &mut dyn TransportTrait) -> Result<Option<u8>, TransferError> {
        match transport.read_byte(self.config.ack_timeout()) {
            Ok(byte) => Ok(Some(byte)),
            Err(TransportError::Timeout(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn describe(reply: Option<u8>) -> String {
    match reply {
        Some(NAK) => "NAK".to_string(),
        Some(byte) => format!("unexpected {byte:#04x}"),
        None => "timeout".to_string(),
    }
}

/// Receiver-side transfer state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    /// Not started
    Idle,
    /// Sending the start byte ('C' or NAK)
    Initiate {
        /// Start bytes sent so far
        attempts: u32,
    },
    /// Waiting for block `expected` or EOT
    WaitBlock {
        /// Next sequence number
        expected: u8,
        /// Failed attempts at this block
        retries: u32,
    },
    /// Block read, checking sequence and trailer
    Verify {
        /// Header byte that opened the block
        header: u8,
        /// Everything after the header
        packet: Vec<u8>,
        /// Next sequence number
        expected: u8,
        /// Failed attempts at this block
        retries: u32,
    },
    /// EOT acknowledged
    Done,
    /// Transfer abandoned
    Aborted(AbortReason),
}

/// Receiving side of the block transfer
pub struct XmodemReceiver {
    config: TransferConfig,
    check: BlockCheck,
    started: bool,
    pending: Option<Vec<u8>>,
}

impl XmodemReceiver {
    /// Create a receiver for one transfer
    pub fn new(config: TransferConfig) -> Self {
        let check = if config.use_crc {
            BlockCheck::Crc16
        } else {
            BlockCheck::Sum8
        };
        Self {
            config,
            check,
            started: false,
            pending: None,
        }
    }

    /// Drive the transfer to completion, writing payload bytes into `sink`.
    ///
    /// Each block is written once the next block (or EOT) arrives, so SUB
    /// padding can be trimmed from the final block.
    pub fn run(
        &mut self,
        transport: &mut dyn TransportTrait,
        sink: &mut dyn Write,
    ) -> Result<TransferProgress, TransferError> {
        let mut progress = TransferProgress::default();
        let mut state = ReceiverState::Idle;

        loop {
            state = match state {
                ReceiverState::Idle => ReceiverState::Initiate { attempts: 0 },

                ReceiverState::Initiate { attempts } => {
                    if attempts > self.config.max_retries {
                        ReceiverState::Aborted(AbortReason::NoSender)
                    } else {
                        let start = match self.check {
                            BlockCheck::Crc16 => CRC_MODE,
                            BlockCheck::Sum8 => NAK,
                        };
                        transport.send(&[start])?;
                        ReceiverState::WaitBlock {
                            expected: 1,
                            retries: attempts,
                        }
                    }
                }

                ReceiverState::WaitBlock { expected, retries } => {
                    match self.read_byte(transport)? {
                        Some(header @ (SOH | STX)) => {
                            self.started = true;
                            let mut packet = vec![0u8; 2 + self.block_len(header) + self.check.size()];
                            match transport.read_exact_within(&mut packet, self.config.block_timeout()) {
                                Ok(()) => ReceiverState::Verify {
                                    header,
                                    packet,
                                    expected,
                                    retries,
                                },
                                Err(TransportError::Timeout(_)) => {
                                    progress.retries += 1;
                                    self.reject(transport, expected, retries)?
                                }
                                Err(e) => return Err(e.into()),
                            }
                        }
                        Some(EOT) => {
                            transport.send(&[ACK])?;
                            ReceiverState::Done
                        }
                        Some(CAN) => ReceiverState::Aborted(AbortReason::RemoteCancel),
                        reply => {
                            if let Some(byte) = reply {
                                tracing::trace!("Unexpected {:#04x} while waiting for block", byte);
                                purge(transport)?;
                            }
                            progress.retries += 1;
                            if self.started {
                                self.reject(transport, expected, retries)?
                            } else {
                                ReceiverState::Initiate {
                                    attempts: retries + 1,
                                }
                            }
                        }
                    }
                }

                ReceiverState::Verify {
                    header,
                    packet,
                    expected,
                    retries,
                } => {
                    let size = self.block_len(header);
                    let (sequence, complement) = (packet[0], packet[1]);
                    let data = &packet[2..2 + size];
                    let trailer = &packet[2 + size..];

                    if sequence != !complement || !self.check.verify(data, trailer) {
                        tracing::warn!("Block {} failed verification", expected);
                        progress.retries += 1;
                        self.reject(transport, expected, retries)?
                    } else if sequence == expected {
                        if let Some(previous) = self.pending.replace(data.to_vec()) {
                            sink.write_all(&previous)?;
                        }
                        transport.send(&[ACK])?;
                        progress.blocks += 1;
                        progress.bytes_transferred += size as u64;
                        tracing::debug!("Block {} stored ({} bytes)", sequence, progress.bytes_transferred);
                        ReceiverState::WaitBlock {
                            expected: expected.wrapping_add(1),
                            retries: 0,
                        }
                    } else if sequence == expected.wrapping_sub(1) {
                        tracing::debug!("Duplicate block {} acknowledged", sequence);
                        transport.send(&[ACK])?;
                        ReceiverState::WaitBlock { expected, retries }
                    } else {
                        tracing::warn!("Expected block {}, got {}", expected, sequence);
                        progress.retries += 1;
                        self.reject(transport, expected, retries)?
                    }
                }

                ReceiverState::Done => {
                    if let Some(mut last) = self.pending.take() {
                        while last.last() == Some(&SUB) {
                            last.pop();
                        }
                        sink.write_all(&last)?;
                    }
                    sink.flush()?;
                    tracing::info!(
                        "Received {} blocks ({} retries)",
                        progress.blocks,
                        progress.retries
                    );
                    return Ok(progress);
                }

                ReceiverState::Aborted(reason) => {
                    tracing::warn!("Receive aborted: {}", reason);
                    if reason != AbortReason::RemoteCancel {
                        transport.send(&[CAN, CAN]).ok();
                    }
                    return Err(TransferError::Aborted(reason));
                }
            };
        }
    }

    fn block_len(&self, header: u8) -> usize {
        match (header, self.config.block_size) {
            (SOH, _) => BlockSize::Standard.size(),
            (_, BlockSize::EightK) => BlockSize::EightK.size(),
            _ => BlockSize::OneK.size(),
        }
    }

    fn read_byte(&self, transport: &mut dyn TransportTrait) -> Result<Option<u8>, TransferError> {
        match transport.read_byte(self.config.block_timeout()) {
            Ok(byte) => Ok(Some(byte)),
            Err(TransportError::Timeout(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn reject(
        &self,
        transport: &mut dyn TransportTrait,
        expected: u8,
        retries: u32,
    ) -> Result<ReceiverState, TransferError> {
        if retries + 1 > self.config.max_retries {
            return Ok(ReceiverState::Aborted(AbortReason::RetryLimit {
                block: expected as u32,
            }));
        }
        transport.send(&[NAK])?;
        Ok(ReceiverState::WaitBlock {
            expected,
            retries: retries + 1,
        })
    }
}

/// Drain the line until it has been quiet for a moment
fn purge(transport: &mut dyn TransportTrait) -> Result<(), TransferError> {
    loop {
        match transport.receive(PURGE_WINDOW) {
            Ok(_) => continue,
            Err(TransportError::Timeout(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}
