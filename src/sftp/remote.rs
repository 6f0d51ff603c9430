//! Remote filesystem seam
//!
//! The bridge only ever talks to the remote through `RemoteFs`. The production
//! implementation is the russh-sftp backed `SftpSession`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::types::{RemoteDirEntry, RemoteStat, WriteMode};
use crate::error::BridgeError;

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Stat `path`, following symbolic links.
    async fn stat(&self, path: &str) -> Result<RemoteStat, BridgeError>;

    /// Entries of a directory. Symbolic links are reported by what they point
    /// to; a dangling link is a file.
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BridgeError>;

    async fn open_read(&self, path: &str) -> Result<RemoteReader, BridgeError>;

    async fn open_write(&self, path: &str, mode: WriteMode) -> Result<RemoteWriter, BridgeError>;

    async fn create_dir(&self, path: &str) -> Result<(), BridgeError>;

    async fn remove_file(&self, path: &str) -> Result<(), BridgeError>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &str) -> Result<(), BridgeError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), BridgeError>;

    /// Whether `path` exists at all (dangling links count as existing).
    async fn exists(&self, path: &str) -> Result<bool, BridgeError>;

    /// Shut the sub-connection down. Further calls fail.
    async fn close(&self) {}
}
