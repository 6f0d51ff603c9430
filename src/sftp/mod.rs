//! SFTP file management module
//!
//! Provides remote file browsing, editing, upload, download (with directory
//! archiving) and SQLite preview over the session's SFTP sub-connection.

mod archive;
mod bridge;
pub mod path_utils;
pub mod remote;
pub mod session;
mod sqlite_preview;
pub mod types;

pub use bridge::FileSystemBridge;
pub use remote::{RemoteFs, RemoteReader, RemoteWriter};
pub use session::SftpSession;
pub use types::*;
