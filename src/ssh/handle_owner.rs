//! Handle Owner Task
//!
//! This module implements the "single owner" pattern for the SSH Handle.
//!
//! # Architecture
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else (the SFTP
//! sub-channel, bounded commands, streamed commands) talks to it through a
//! `HandleController`, which sends commands over an mpsc channel.
//!
//! This avoids:
//! - `Arc<Mutex<Handle>>` lock contention
//! - Deadlocks from holding locks across `.await`
//! - Protocol violations from concurrent Handle access
//!
//! # Usage
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, session_id);
//!
//! // Open a channel
//! let channel = controller.open_session_channel().await?;
//! ```

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// How often the owner task checks whether the transport died underneath it
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (exec, subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (copies the sender). Any holder can open channels or
/// disconnect, so it never leaves the process.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Create a new HandleController with the given sender
    ///
    /// This is primarily used for testing. In production, use `spawn_handle_owner_task`.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| match e {
                russh::Error::Disconnect => SshError::Disconnected,
                other => SshError::ChannelError(other.to_string()),
            })
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
/// The task ends (and every controller reports disconnected) when `Disconnect` is
/// received, when all controllers are dropped, or when the transport closes on its own.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);

    tokio::spawn(async move {
        let handle = handle; // Move into task, becomes sole owner
        let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);

        info!("Handle owner task started for session {}", session_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                            // Channel will be dropped, SSH server will close it
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for session {}", session_id);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for session {}", session_id);
                        break;
                    }
                },

                _ = liveness.tick() => {
                    if handle.is_closed() {
                        warn!("SSH transport closed by peer for session {}", session_id);
                        break;
                    }
                }
            }
        }

        // Refuse anything still queued, callers see `Disconnected`
        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        debug!("Handle owner task terminated for session {}", session_id);
    });

    HandleController { cmd_tx }
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    // Close receiver first, prevent new messages
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {
                // Already disconnecting, ignore
            }
        }
    }
}
