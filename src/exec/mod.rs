//! Remote command execution
//!
//! Bounded commands run to completion and return their combined output;
//! streamed commands hand out converted markup chunk by chunk while the
//! remote process is still running.

mod channel;
mod command;
mod stream;

pub use channel::{ChannelEvent, ExecChannel, ExecTransport};
pub use command::{CommandExecutor, CommandResult};
pub use stream::{StreamChunk, StreamState, StreamingExecutor};
