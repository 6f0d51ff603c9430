//! SSH module - owns the connection to the remote host
//!
//! This module provides the core SSH functionality using russh library.
//!
//! # Features
//! - Password and private key authentication
//! - Single-owner handle task serializing channel opens
//! - `Session` lifecycle with per-operation file leases
//! - Exec channels for bounded and streamed commands

mod client;
mod config;
mod error;
mod handle_owner;
mod session;
mod transport;

pub use client::{expand_tilde, ClientHandler, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use session::{FileLease, Session, SessionState};
pub use transport::SshTransport;
