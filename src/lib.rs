//! VPS Explorer - a browser front door to one remote machine
//!
//! Holds a single SSH connection and its SFTP channel, and serves file
//! browsing, editing, transfers and command execution over HTTP.

// Use mimalloc as the global allocator for better performance
// with high-frequency small allocations (output chunks, request bodies)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod sftp;
pub mod ssh;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use error::BridgeError;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
