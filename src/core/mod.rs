//! Core module containing the connectivity layer
//!
//! This module provides:
//! - Transport layer for serial and TCP links, plus an in-memory link
//! - Device discovery (USB ids, UDP announcements)
//! - Command channel: escaping, framing, listing parsing
//! - Block file transfer (XMODEM family)
//! - Connection handle with a single ready gate
//! - Machine controller for file operations

pub mod command;
pub mod connection;
pub mod discovery;
pub mod machine;
pub mod transfer;
pub mod transport;
