//! The single remote session
//!
//! A `Session` owns the one SSH connection (through its handle owner task) and
//! the SFTP sub-connection riding on it. It is constructed explicitly and shared
//! as `Arc<Session>` with the bridge and the executors.
//!
//! # Locking
//!
//! - The SFTP sub-connection sits behind a `tokio::sync::Mutex`. Each bridge
//!   operation takes an owned guard (`FileLease`) for its whole duration, so two
//!   filesystem operations never interleave on the transfer channel.
//! - Exec channels are opened through the handle owner task and then owned by
//!   the command that asked for them; no session lock is held while a command
//!   runs.
//! - Session state lives behind a `parking_lot::RwLock` that is never held
//!   across an `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use super::client::SshClient;
use super::config::SshConfig;
use super::handle_owner::spawn_handle_owner_task;
use super::transport::SshTransport;
use crate::error::BridgeError;
use crate::exec::ExecTransport;
use crate::sftp::{RemoteFs, SftpSession};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

/// Exclusive access to the file transport for one operation
pub type FileLease = OwnedMutexGuard<Box<dyn RemoteFs>>;

struct Link {
    transport: Arc<dyn ExecTransport>,
    files: Arc<Mutex<Box<dyn RemoteFs>>>,
}

struct Slot {
    state: SessionState,
    link: Option<Link>,
}

pub struct Session {
    id: String,
    slot: RwLock<Slot>,
    /// Serializes `connect` attempts
    connecting: Mutex<()>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slot: RwLock::new(Slot {
                state: SessionState::Unconnected,
                link: None,
            }),
            connecting: Mutex::new(()),
        }
    }

    /// A connected session over already-built transports
    pub fn from_parts(files: Box<dyn RemoteFs>, transport: Arc<dyn ExecTransport>) -> Self {
        let session = Self::new();
        session.install(files, transport);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connect, authenticate and open the SFTP sub-connection.
    ///
    /// Allowed from `Unconnected` and `Closed`; a connected session must be
    /// closed first. Any failure is reported once, with no retry.
    pub async fn connect(&self, config: &SshConfig) -> Result<(), BridgeError> {
        let _connecting = self.connecting.lock().await;

        if self.state() == SessionState::Connected {
            return Err(BridgeError::Connection(
                "Session is already connected".to_string(),
            ));
        }

        let handle = SshClient::new(config.clone())
            .connect()
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))?;

        let controller = spawn_handle_owner_task(handle, self.id.clone());

        let files = match SftpSession::open(&controller, &self.id).await {
            Ok(files) => files,
            Err(e) => {
                controller.disconnect().await;
                return Err(BridgeError::Connection(e.to_string()));
            }
        };

        self.install(Box::new(files), Arc::new(SshTransport::new(controller)));
        info!(
            "Session {} connected to {}@{}",
            self.id,
            config.username,
            config.host_port()
        );
        Ok(())
    }

    fn install(&self, files: Box<dyn RemoteFs>, transport: Arc<dyn ExecTransport>) {
        let mut slot = self.slot.write();
        slot.link = Some(Link {
            transport,
            files: Arc::new(Mutex::new(files)),
        });
        slot.state = SessionState::Connected;
    }

    pub fn state(&self) -> SessionState {
        self.slot.read().state
    }

    /// Connected and the transport is still alive
    pub fn is_connected(&self) -> bool {
        let slot = self.slot.read();
        match (&slot.state, &slot.link) {
            (SessionState::Connected, Some(link)) => link.transport.is_alive(),
            _ => false,
        }
    }

    /// Take the file transport for one operation.
    pub async fn files(&self) -> Result<FileLease, BridgeError> {
        let files = {
            let slot = self.slot.read();
            match (&slot.state, &slot.link) {
                (SessionState::Connected, Some(link)) if link.transport.is_alive() => {
                    link.files.clone()
                }
                _ => return Err(BridgeError::NotConnected),
            }
        };
        Ok(files.lock_owned().await)
    }

    /// The exec transport, for the command executors
    pub fn transport(&self) -> Result<Arc<dyn ExecTransport>, BridgeError> {
        let slot = self.slot.read();
        match (&slot.state, &slot.link) {
            (SessionState::Connected, Some(link)) if link.transport.is_alive() => {
                Ok(link.transport.clone())
            }
            _ => Err(BridgeError::NotConnected),
        }
    }

    /// Disconnect and move to `Closed`. Safe to call in any state.
    pub async fn close(&self) {
        let link = {
            let mut slot = self.slot.write();
            slot.state = SessionState::Closed;
            slot.link.take()
        };

        let Some(link) = link else {
            return;
        };

        // Wait for any in-flight file operation before tearing the channel down
        link.files.lock().await.close().await;
        link.transport.disconnect().await;
        info!("Session {} closed", self.id);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
