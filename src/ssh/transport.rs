//! russh-backed exec transport
//!
//! Channel opens go through the `HandleController`, so the handle owner task
//! serializes them; each command then owns its channel outright.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::{debug, warn};

use super::handle_owner::HandleController;
use crate::error::BridgeError;
use crate::exec::{ChannelEvent, ExecChannel, ExecTransport};

pub struct SshTransport {
    controller: HandleController,
}

impl SshTransport {
    pub fn new(controller: HandleController) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl ExecTransport for SshTransport {
    async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, BridgeError> {
        let channel = self.controller.open_session_channel().await?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| BridgeError::remote(format!("Failed to execute command: {}", e)))?;

        debug!("Exec channel {:?} started", channel.id());
        Ok(Box::new(SshExecChannel { channel }))
    }

    fn is_alive(&self) -> bool {
        self.controller.is_connected()
    }

    async fn disconnect(&self) {
        self.controller.disconnect().await;
    }
}

struct SshExecChannel {
    channel: Channel<Msg>,
}

#[async_trait]
impl ExecChannel for SshExecChannel {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, BridgeError> {
        loop {
            let event = match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => ChannelEvent::Stdout(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext != 1 {
                        continue;
                    }
                    ChannelEvent::Stderr(data.to_vec())
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    ChannelEvent::ExitStatus(exit_status)
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    warn!("Remote command killed by signal {:?}", signal_name);
                    continue;
                }
                Some(ChannelMsg::Eof) => ChannelEvent::Eof,
                Some(ChannelMsg::Close) | None => return Ok(None),
                Some(_) => continue,
            };
            return Ok(Some(event));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!("Closing exec channel failed: {}", e);
        }
    }
}
