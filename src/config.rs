//! Command-line configuration
//!
//! One remote machine per process: the CLI gathers the SSH credentials and
//! the listening address, then hands out a `BridgeConfig`.

use clap::{ArgGroup, Parser};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::ssh::{AuthMethod, SshConfig};

/// Range a listening port is drawn from when none is given
pub const RANDOM_PORT_RANGE: std::ops::RangeInclusive<u16> = 5000..=9999;

#[derive(Parser)]
#[command(
    name = "vps-explorer",
    version,
    about = "Browse, edit and run commands on a remote machine from a web browser"
)]
#[command(group(ArgGroup::new("auth").required(true).args(["password", "key"])))]
pub struct Cli {
    #[arg(long, env = "VPS_HOST", help = "Remote host to connect to")]
    pub host: String,

    #[arg(long, short = 'p', env = "VPS_PORT", default_value_t = 22, help = "SSH port")]
    pub port: u16,

    #[arg(long, short = 'u', env = "VPS_USER", default_value = "root", help = "SSH user")]
    pub user: String,

    #[arg(long, env = "VPS_PASSWORD", hide_env_values = true, help = "Password authentication")]
    pub password: Option<String>,

    #[arg(long, value_name = "PATH", env = "VPS_KEY", help = "Private key authentication")]
    pub key: Option<String>,

    #[arg(
        long,
        env = "VPS_KEY_PASSPHRASE",
        hide_env_values = true,
        help = "Passphrase for an encrypted private key"
    )]
    pub passphrase: Option<String>,

    #[arg(long = "connect-timeout", value_name = "SECS", default_value_t = 10)]
    pub connect_timeout: u64,

    #[arg(long, default_value = "0.0.0.0", help = "Address the web server binds to")]
    pub bind: String,

    #[arg(
        long = "listen-port",
        help = "Web server port (random between 5000 and 9999 when omitted)"
    )]
    pub listen_port: Option<u16>,

    #[arg(long = "max-upload-mb", value_name = "MB", default_value_t = 1024)]
    pub max_upload_mb: usize,

    #[arg(
        long = "log-level",
        env = "VPS_LOG_LEVEL",
        default_value = "info",
        help = "Default log filter when RUST_LOG is unset"
    )]
    pub log_level: String,
}

impl Cli {
    pub fn into_config(self) -> Result<BridgeConfig, BridgeError> {
        if self.passphrase.is_some() && self.key.is_none() {
            return Err(BridgeError::invalid("--passphrase requires --key"));
        }

        let auth = match (self.key, self.password) {
            (Some(key_path), _) => AuthMethod::key(key_path, self.passphrase),
            (None, Some(password)) => AuthMethod::password(password),
            (None, None) => {
                return Err(BridgeError::invalid("Either --password or --key is required"))
            }
        };

        let mut ssh = SshConfig::new(self.host, self.port, self.user, auth);
        ssh.timeout_secs = self.connect_timeout;

        let server = ServerConfig {
            bind: self.bind,
            port: self
                .listen_port
                .unwrap_or_else(|| rand::thread_rng().gen_range(RANDOM_PORT_RANGE)),
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
        };

        Ok(BridgeConfig { ssh, server })
    }
}

/// Everything the binary needs to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub ssh: SshConfig,
    pub server: ServerConfig,
}

/// Web server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
    /// Largest accepted request body
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_max_upload() -> usize {
    1024 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 8000,
            max_upload_bytes: default_max_upload(),
        }
    }
}
