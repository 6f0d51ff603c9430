//! Exec channel abstraction
//!
//! Commands never share a channel: every bounded or streamed command asks the
//! transport for a fresh exec channel and owns it until the command ends.

use async_trait::async_trait;

use crate::error::BridgeError;

/// One event read from an exec channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    /// The remote will send no more output
    Eof,
}

/// Opens exec channels on the live connection
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Open a dedicated channel and start `command` on it.
    async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, BridgeError>;

    /// Whether the underlying connection is still usable.
    fn is_alive(&self) -> bool;

    /// Tear down the connection. Safe to call more than once.
    async fn disconnect(&self);
}

/// A running command
#[async_trait]
pub trait ExecChannel: Send {
    /// Next event, or `None` once the channel is closed.
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, BridgeError>;

    /// Close the channel and release remote resources.
    async fn close(&mut self);
}
