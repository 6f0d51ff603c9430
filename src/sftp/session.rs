//! SFTP sub-connection
//!
//! Wraps a russh-sftp session opened on its own channel of the live SSH
//! connection and exposes it as a `RemoteFs`.

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::OpenFlags;
use tracing::{debug, info};

use super::path_utils::join_remote_path;
use super::remote::{RemoteFs, RemoteReader, RemoteWriter};
use super::types::{EntryKind, RemoteDirEntry, RemoteStat, WriteMode};
use crate::error::BridgeError;
use crate::ssh::{HandleController, SshError};

/// SFTP Session wrapper
pub struct SftpSession {
    sftp: RusshSftpSession,
    session_id: String,
}

impl SftpSession {
    /// Open the SFTP subsystem on a fresh channel of the connection
    pub async fn open(
        handle_controller: &HandleController,
        session_id: &str,
    ) -> Result<Self, SshError> {
        info!("Opening SFTP subsystem for session {}", session_id);

        let channel = handle_controller.open_session_channel().await?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SshError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::SubsystemNotAvailable(e.to_string()))?;

        info!("SFTP subsystem opened for session {}", session_id);

        Ok(Self {
            sftp,
            session_id: session_id.to_string(),
        })
    }

    /// Classify a link by its target; a dangling link stays a file
    async fn follow_link(&self, path: &str, link: &Metadata) -> (EntryKind, u64) {
        match self.sftp.metadata(path).await {
            Ok(target) => (kind_of(&target), target.size.unwrap_or(0)),
            Err(_) => (EntryKind::File, link.size.unwrap_or(0)),
        }
    }
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// Prefix the remote's own message with the path it refers to
fn map_sftp_error(err: SftpErrorInner, path: &str) -> BridgeError {
    BridgeError::RemoteOperation(format!("{}: {}", path, err))
}

#[async_trait]
impl RemoteFs for SftpSession {
    async fn stat(&self, path: &str) -> Result<RemoteStat, BridgeError> {
        let metadata = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;

        if !metadata.is_symlink() {
            return Ok(RemoteStat {
                kind: kind_of(&metadata),
                size: metadata.size.unwrap_or(0),
                is_link: false,
            });
        }

        let (kind, size) = self.follow_link(path, &metadata).await;
        Ok(RemoteStat {
            kind,
            size,
            is_link: true,
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BridgeError> {
        debug!("Listing directory: {}", path);

        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            let metadata = entry.metadata();

            let is_link = metadata.is_symlink();
            let (kind, size) = if is_link {
                self.follow_link(&join_remote_path(path, &name), &metadata)
                    .await
            } else {
                (kind_of(&metadata), metadata.size.unwrap_or(0))
            };

            entries.push(RemoteDirEntry {
                name,
                kind,
                size,
                is_link,
            });
        }

        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, BridgeError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str, mode: WriteMode) -> Result<RemoteWriter, BridgeError> {
        let flags = match mode {
            WriteMode::Truncate => OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            WriteMode::CreateNew => OpenFlags::CREATE | OpenFlags::EXCLUDE | OpenFlags::WRITE,
        };

        let file = self
            .sftp
            .open_with_flags(path, flags)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn create_dir(&self, path: &str) -> Result<(), BridgeError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn remove_file(&self, path: &str) -> Result<(), BridgeError> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), BridgeError> {
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BridgeError> {
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| map_sftp_error(e, from))
    }

    async fn exists(&self, path: &str) -> Result<bool, BridgeError> {
        if self.sftp.try_exists(path).await.map_err(|e| map_sftp_error(e, path))? {
            return Ok(true);
        }
        // try_exists follows links; a dangling link still occupies the name
        Ok(self.sftp.symlink_metadata(path).await.is_ok())
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close for session {} failed: {}", self.session_id, e);
        }
    }
}
