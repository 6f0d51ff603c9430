//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;

/// SSH Client handler for russh
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate, returning the raw russh handle.
    ///
    /// The whole exchange (TCP connect, handshake, authentication) is bounded by
    /// `timeout_secs`.
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(timeout, self.connect_inner())
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "Connection timed out after {} seconds",
                    timeout.as_secs()
                ))
            })?
    }

    async fn connect_inner(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = self.config.host_port();

        info!("Connecting to SSH server at {}", addr);

        // Resolve address
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(self.config.host.clone(), self.config.port);

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(expand_tilde(key_path), passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}@{}", self.config.username, addr);

        Ok(handle)
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Client handler for russh callbacks
///
/// The operator connects to a machine they administer, so every server key is
/// accepted; the key algorithm is logged for the record.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting {} host key for {}:{}",
            server_public_key.algorithm().as_str(),
            self.host,
            self.port
        );
        Ok(true)
    }
}
