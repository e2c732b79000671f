//! Line-oriented command channel
//!
//! Commands are single text lines. Paths embedded in them are escaped so the
//! firmware can split the line on whitespace; responses are text terminated by
//! an EOT byte.

use super::transfer::EOT;
use super::transport::{TransportError, TransportTrait};
use crate::utils::format::format_size;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timestamp layout used by `ls -e -s`
pub const LISTING_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Substitutions applied by [`escape`], in order
const PLACEHOLDERS: [(char, char); 5] = [
    (' ', '\x01'),
    ('?', '\x02'),
    ('*', '\x03'),
    ('!', '\x04'),
    ('~', '\x05'),
];

/// Escape a path or argument for embedding in a command line.
///
/// Backslashes become forward slashes; space, `?`, `*`, `!` and `~` become the
/// placeholder bytes 0x01..=0x05. Everything else is left alone.
pub fn escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\\' => '/',
            c => PLACEHOLDERS
                .iter()
                .find(|(literal, _)| *literal == c)
                .map_or(c, |&(_, placeholder)| placeholder),
        })
        .collect()
}

/// Reverse the placeholder substitution of [`escape`].
///
/// Slashes are not turned back into backslashes.
pub fn unescape(text: &str) -> String {
    text.chars()
        .map(|c| {
            PLACEHOLDERS
                .iter()
                .find(|(_, placeholder)| *placeholder == c)
                .map_or(c, |&(literal, _)| literal)
        })
        .collect()
}

/// `ls -e -s <path>`
pub fn list_command(path: &str) -> String {
    format!("ls -e -s {}\n", escape(path))
}

/// `rm <path>`
pub fn remove_command(path: &str) -> String {
    format!("rm {}\n", escape(path))
}

/// `upload <path>`, followed by a block transfer from us
pub fn upload_command(path: &str) -> String {
    format!("upload {}\n", escape(path))
}

/// `download <path>`, followed by a block transfer from the machine
pub fn download_command(path: &str) -> String {
    format!("download {}\n", escape(path))
}

/// Send one command line, appending the newline if missing
pub fn send_command(transport: &mut dyn TransportTrait, text: &str) -> Result<(), TransportError> {
    tracing::debug!("Sending command: {}", text.trim_end());
    if text.ends_with('\n') {
        transport.send(text.as_bytes())
    } else {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        transport.send(line.as_bytes())
    }
}

/// Read a response up to its EOT terminator, which is stripped.
///
/// An escaped `!` travels as the same byte as EOT, so EOT only ends the
/// response when it is the whole reply or follows a newline. If data stops
/// arriving first, whatever arrived is returned without a trailing EOT. A
/// timeout before the first byte is an error.
pub fn receive_response(
    transport: &mut dyn TransportTrait,
    timeout: Duration,
) -> Result<String, TransportError> {
    let mut response = Vec::new();
    loop {
        match transport.receive(timeout) {
            Ok(chunk) => {
                response.extend_from_slice(&chunk);
                if is_terminated(&response) {
                    response.pop();
                    break;
                }
            }
            Err(TransportError::Timeout(_)) if !response.is_empty() => {
                tracing::debug!("Response ended without EOT after {} bytes", response.len());
                if response.last() == Some(&EOT) {
                    response.pop();
                }
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

fn is_terminated(response: &[u8]) -> bool {
    matches!(response, [EOT] | [.., b'\n', EOT])
}

/// Read a response and split it into lines, dropping trailing blank lines
pub fn receive_lines(
    transport: &mut dyn TransportTrait,
    timeout: Duration,
) -> Result<Vec<String>, TransportError> {
    let response = receive_response(transport, timeout)?;
    let mut lines: Vec<String> = response.lines().map(str::to_string).collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    Ok(lines)
}

/// Malformed directory listing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line did not have exactly three fields
    #[error("Listing line {line}: expected 3 fields, found {found}")]
    FieldCount {
        /// 1-based line number
        line: usize,
        /// Fields present
        found: usize,
    },

    /// Size field was not a decimal integer
    #[error("Listing line {line}: invalid size {value:?}")]
    InvalidSize {
        /// 1-based line number
        line: usize,
        /// Offending field
        value: String,
    },

    /// Timestamp field was not `YYYYMMDDhhmmss`
    #[error("Listing line {line}: invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// 1-based line number
        line: usize,
        /// Offending field
        value: String,
    },
}

/// One file in a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileEntry {
    /// File name, unescaped
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification time as reported by the machine
    pub modified_at: NaiveDateTime,
}

impl fmt::Display for RemoteFileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, format_size(self.size_bytes))
    }
}

/// Parse an `ls -e -s` response.
///
/// Entries keep the machine's order. Any malformed line fails the whole parse;
/// trailing blank lines are ignored and an empty response is an empty listing.
pub fn parse_listing(text: &str) -> Result<Vec<RemoteFileEntry>, ParseError> {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(index, line)| parse_entry(index + 1, line))
        .collect()
}

fn parse_entry(line: usize, text: &str) -> Result<RemoteFileEntry, ParseError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [name, size, modified] = fields.as_slice() else {
        return Err(ParseError::FieldCount {
            line,
            found: fields.len(),
        });
    };

    let size_bytes = size.parse::<u64>().map_err(|_| ParseError::InvalidSize {
        line,
        value: size.to_string(),
    })?;

    let invalid_timestamp = || ParseError::InvalidTimestamp {
        line,
        value: modified.to_string(),
    };
    if modified.len() != 14 || !modified.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_timestamp());
    }
    let modified_at =
        NaiveDateTime::parse_from_str(modified, LISTING_TIME_FORMAT).map_err(|_| invalid_timestamp())?;

    Ok(RemoteFileEntry {
        name: unescape(name),
        size_bytes,
        modified_at,
    })
}
