//! Machine controller
//!
//! File-level operations on the machine's SD card built from one command line
//! and, for transfers, one block transfer.

use super::command::{self, RemoteFileEntry};
use super::connection::Connection;
use super::discovery::{self, DiscoveredDevice};
use super::transfer::{TransferError, TransferResult};
use super::transport::TransportError;
use crate::config::LinkConfig;
use crate::error::Result;
use std::fs::File;
use std::path::Path;

/// High-level controller over one connection
pub struct Machine {
    connection: Connection,
    remote_dir: String,
}

impl Machine {
    /// Wrap an existing connection
    pub fn new(connection: Connection, config: &LinkConfig) -> Self {
        Self {
            connection,
            remote_dir: config.remote_gcode_dir.clone(),
        }
    }

    /// Open a connection to `address` (device path or host[:port])
    pub fn open(address: &str, config: &LinkConfig) -> Result<Self> {
        let connection = Connection::open_address(address, config)?;
        Ok(Self::new(connection, config))
    }

    /// Look for machines on every link type
    pub fn find_devices(config: &LinkConfig) -> Vec<DiscoveredDevice> {
        discovery::find_all(config)
    }

    /// Send a raw command line without waiting for a reply
    pub fn run(&mut self, command: &str) -> Result<()> {
        Ok(self.connection.send(command)?)
    }

    /// Send a command line and return its response lines
    pub fn query(&mut self, command: &str) -> Result<Vec<String>> {
        self.connection.send(command)?;
        Ok(self.connection.receive_lines()?)
    }

    /// List a remote directory in the machine's order
    pub fn list_files(&mut self, directory: &str) -> Result<Vec<RemoteFileEntry>> {
        self.connection.send(&command::list_command(directory))?;
        let response = self.connection.receive()?;
        let entries = command::parse_listing(&response)?;
        tracing::debug!("{} entries in {}", entries.len(), directory);
        Ok(entries)
    }

    /// List the configured G-code directory
    pub fn list_gcode_files(&mut self) -> Result<Vec<RemoteFileEntry>> {
        let directory = self.remote_dir.clone();
        self.list_files(&directory)
    }

    /// Delete a remote file
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        self.connection.send(&command::remove_command(path))?;
        match self.connection.receive() {
            Ok(reply) if !reply.trim().is_empty() => {
                tracing::debug!("rm {}: {}", path, reply.trim());
            }
            Ok(_) | Err(TransportError::Timeout(_)) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("Removed {}", path);
        Ok(())
    }

    /// Upload into the G-code directory under the local file's name
    pub fn upload_file(&mut self, local: &Path) -> Result<TransferResult> {
        let name = local
            .file_name()
            .ok_or_else(|| TransferError::LocalFileNotFound(local.to_path_buf()))?
            .to_string_lossy()
            .into_owned();
        let remote = self.remote_path(&name);
        self.upload_file_to(local, &remote)
    }

    /// Upload to an explicit remote path
    pub fn upload_file_to(&mut self, local: &Path, remote: &str) -> Result<TransferResult> {
        if !local.is_file() {
            return Err(TransferError::LocalFileNotFound(local.to_path_buf()).into());
        }
        self.connection.send(&command::upload_command(remote))?;
        let result = self.connection.upload(local)?;
        tracing::info!("Uploaded {} to {} ({} bytes)", local.display(), remote, result.bytes);
        Ok(result)
    }

    /// Download a remote file into `local`.
    ///
    /// The local file is created first so a bad local path fails before the
    /// machine starts sending.
    pub fn download_file(&mut self, remote: &str, local: &Path) -> Result<TransferResult> {
        self.connection.ensure_ready()?;
        let file = File::create(local).map_err(TransferError::File)?;
        if let Err(e) = self.connection.send(&command::download_command(remote)) {
            std::fs::remove_file(local).ok();
            return Err(e.into());
        }
        let result = self.connection.download_into(file, local)?;
        tracing::info!("Downloaded {} to {} ({} bytes)", remote, local.display(), result.bytes);
        Ok(result)
    }

    /// Remote path for a file name in the G-code directory
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.remote_dir.trim_end_matches('/'), name)
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        Ok(self.connection.close()?)
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Underlying connection, mutably
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}
