//! Bounded command execution
//!
//! Runs one command on a fresh exec channel and waits for the channel to
//! close. A non-zero exit status is not an error; only transport failures are.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::channel::ChannelEvent;
use crate::error::BridgeError;
use crate::ssh::Session;
use crate::terminal::AnsiToMarkupConverter;

/// Output of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Stdout followed by stderr, converted to markup when requested
    pub output_markup: String,
    /// The remote reported an exit status or end of output
    pub exit_observed: bool,
    /// Informational only
    pub exit_status: Option<u32>,
}

pub struct CommandExecutor {
    session: Arc<Session>,
}

impl CommandExecutor {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Run `command` to completion. There is no timeout: a command that never
    /// exits keeps the call pending.
    pub async fn run_once(
        &self,
        command: &str,
        render_markup: bool,
    ) -> Result<CommandResult, BridgeError> {
        if command.trim().is_empty() {
            return Err(BridgeError::invalid("No command provided"));
        }

        let transport = self.session.transport()?;
        debug!("Running command: {}", command);
        let mut channel = transport.open_exec(command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        let mut eof = false;

        loop {
            match channel.next_event().await {
                Ok(Some(ChannelEvent::Stdout(data))) => stdout.extend_from_slice(&data),
                Ok(Some(ChannelEvent::Stderr(data))) => stderr.extend_from_slice(&data),
                Ok(Some(ChannelEvent::ExitStatus(status))) => exit_status = Some(status),
                Ok(Some(ChannelEvent::Eof)) => eof = true,
                Ok(None) => break,
                Err(e) => {
                    channel.close().await;
                    return Err(e);
                }
            }
        }
        channel.close().await;

        debug!(
            "Command finished with status {:?}, {} bytes stdout, {} bytes stderr",
            exit_status,
            stdout.len(),
            stderr.len()
        );

        stdout.extend_from_slice(&stderr);
        let output_markup = if render_markup {
            AnsiToMarkupConverter::convert(&stdout)
        } else {
            String::from_utf8_lossy(&stdout).into_owned()
        };

        Ok(CommandResult {
            output_markup,
            exit_observed: exit_status.is_some() || eof,
            exit_status,
        })
    }
}
