//! Simulated Carvera controller for integration tests
//!
//! Answers the command set over a `MemoryTransport` and plays either side of
//! the block transfer, storing uploaded files in memory.

#![allow(dead_code)]

use carvera_core::core::transfer::{crc16_xmodem, encode_block, md5_hex, BlockCheck, BlockSize};
use carvera_core::{escape, unescape, MemoryTransport};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const SUB: u8 = 0x1A;

/// Timestamp reported for every stored file
pub const MODIFIED: &str = "20240101120000";

#[derive(Default)]
enum Mode {
    #[default]
    Command,
    Upload {
        path: String,
        payload: Vec<u8>,
        expected: u8,
    },
    Download {
        blocks: Vec<Vec<u8>>,
        next: usize,
        eot_sent: bool,
    },
}

/// Machine-side state, shared with the test through [`SharedMachine`]
#[derive(Default)]
pub struct MachineState {
    /// Stored files by absolute path
    pub files: BTreeMap<String, Vec<u8>>,
    /// Command lines received, still escaped
    pub commands: Vec<String>,
    /// Prefix downloads with the MD5 of the content
    pub md5_on_download: bool,
    /// Cancel every upload after EOT
    pub reject_uploads: bool,
    mode: Mode,
}

pub type SharedMachine = Arc<Mutex<MachineState>>;

pub fn shared_machine() -> SharedMachine {
    Arc::new(Mutex::new(MachineState::default()))
}

/// Transport wired to the simulated machine
pub fn simulated_transport(machine: &SharedMachine) -> MemoryTransport {
    let machine = machine.clone();
    MemoryTransport::with_responder(move |data| machine.lock().unwrap().handle(data))
        .named("192.168.1.50:2222")
}

impl MachineState {
    fn handle(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        match std::mem::take(&mut self.mode) {
            Mode::Command => self.command(data),
            Mode::Upload {
                path,
                payload,
                expected,
            } => self.upload(data, path, payload, expected),
            Mode::Download {
                blocks,
                next,
                eot_sent,
            } => self.download(data, blocks, next, eot_sent),
        }
    }

    fn command(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let line = String::from_utf8_lossy(data).trim_end_matches('\n').to_string();
        self.commands.push(line.clone());
        let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));

        match verb {
            "ls" => {
                let directory = unescape(argument.trim_start_matches("-e -s "));
                let prefix = format!("{}/", directory.trim_end_matches('/'));
                let mut listing = Vec::new();
                for (path, content) in &self.files {
                    if let Some(name) = path.strip_prefix(&prefix) {
                        if !name.contains('/') {
                            listing.extend_from_slice(
                                format!("{} {} {}\n", escape(name), content.len(), MODIFIED).as_bytes(),
                            );
                        }
                    }
                }
                listing.push(EOT);
                // split to exercise response accumulation
                let tail = listing.split_off(listing.len() / 2);
                vec![listing, tail]
            }
            "rm" => {
                self.files.remove(&unescape(argument));
                vec![vec![EOT]]
            }
            "upload" => {
                self.mode = Mode::Upload {
                    path: unescape(argument),
                    payload: Vec::new(),
                    expected: 1,
                };
                vec![vec![b'C']]
            }
            "download" => match self.files.get(&unescape(argument)) {
                Some(content) => {
                    let mut payload = Vec::new();
                    if self.md5_on_download {
                        payload.extend_from_slice(md5_hex(content).as_bytes());
                    }
                    payload.extend_from_slice(content);
                    let blocks = payload
                        .chunks(BlockSize::EightK.size())
                        .enumerate()
                        .map(|(i, chunk)| {
                            encode_block(BlockSize::EightK, BlockCheck::Crc16, (i + 1) as u8, chunk)
                        })
                        .collect();
                    self.mode = Mode::Download {
                        blocks,
                        next: 0,
                        eot_sent: false,
                    };
                    Vec::new()
                }
                None => vec![vec![CAN, CAN]],
            },
            _ => vec![b"ok\n\x04".to_vec()],
        }
    }

    fn upload(&mut self, data: &[u8], path: String, mut payload: Vec<u8>, expected: u8) -> Vec<Vec<u8>> {
        match data.first() {
            Some(&EOT) => {
                while payload.last() == Some(&SUB) {
                    payload.pop();
                }
                let content = payload.split_off(32.min(payload.len()));
                let digest = String::from_utf8_lossy(&payload).into_owned();
                if self.reject_uploads || md5_hex(&content) != digest {
                    return vec![vec![CAN]];
                }
                self.files.insert(path, content);
                vec![vec![ACK]]
            }
            Some(&header) if header == SOH || header == STX => {
                let size = if header == SOH { 128 } else { data.len() - 5 };
                let sequence = data[1];
                let block = &data[3..3 + size];
                let crc = u16::from_be_bytes([data[3 + size], data[4 + size]]);
                let reply = if crc != crc16_xmodem(block) || data[2] != !sequence {
                    NAK
                } else if sequence == expected {
                    payload.extend_from_slice(block);
                    self.mode = Mode::Upload {
                        path,
                        payload,
                        expected: expected.wrapping_add(1),
                    };
                    return vec![vec![ACK]];
                } else if sequence == expected.wrapping_sub(1) {
                    ACK
                } else {
                    NAK
                };
                self.mode = Mode::Upload {
                    path,
                    payload,
                    expected,
                };
                vec![vec![reply]]
            }
            _ => Vec::new(),
        }
    }

    fn download(&mut self, data: &[u8], blocks: Vec<Vec<u8>>, mut next: usize, mut eot_sent: bool) -> Vec<Vec<u8>> {
        let reply = match data.first() {
            Some(&CAN) => return Vec::new(),
            Some(&ACK) if eot_sent => return Vec::new(),
            Some(&ACK) => {
                next += 1;
                if next < blocks.len() {
                    blocks[next].clone()
                } else {
                    eot_sent = true;
                    vec![EOT]
                }
            }
            // 'C' or NAK: (re)send the current block
            _ => match blocks.get(next) {
                Some(block) if !eot_sent => block.clone(),
                _ => {
                    eot_sent = true;
                    vec![EOT]
                }
            },
        };
        self.mode = Mode::Download {
            blocks,
            next,
            eot_sent,
        };
        vec![reply]
    }
}

/// Deterministic file content
pub fn sample_content(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| b"G1 X10 Y20 F1500\n"[i % 17])
        .collect()
}
