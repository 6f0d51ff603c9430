//! Bridge error taxonomy
//!
//! Every public operation of the bridge returns `Result<_, BridgeError>`; the
//! gateway renders the `Display` text verbatim as the user-visible message.

use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The session is not connected, or its transport died.
    #[error("SSH session not connected")]
    NotConnected,

    /// Establishing the session failed (network, handshake, authentication).
    /// Carries the cause text as reported by the SSH layer.
    #[error("{0}")]
    Connection(String),

    /// The remote rejected a filesystem or command operation.
    #[error("{0}")]
    RemoteOperation(String),

    /// A recursive operation stopped or skipped entries part way through.
    /// Earlier steps are not undone.
    #[error("{operation} incomplete: {}", failures.join("; "))]
    PartialFailure {
        operation: String,
        failures: Vec<String>,
    },

    /// A caller broke the operation contract (missing argument, malformed name).
    #[error("{0}")]
    InvalidArgument(String),

    /// Local staging file failure
    #[error("Local IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn remote(message: impl Into<String>) -> Self {
        BridgeError::RemoteOperation(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(message.into())
    }
}

impl From<russh_sftp::client::error::Error> for BridgeError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        BridgeError::RemoteOperation(err.to_string())
    }
}

impl From<SshError> for BridgeError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Disconnected => BridgeError::NotConnected,
            other => BridgeError::RemoteOperation(other.to_string()),
        }
    }
}

// Rendered as a plain message string at the HTTP boundary
impl serde::Serialize for BridgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
