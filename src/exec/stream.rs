//! Streamed command execution
//!
//! A `StreamingExecutor` owns one exec channel for one long-running command and
//! turns its output into markup chunks as it arrives:
//!
//! ```text
//! Opening -> Streaming -> Draining -> Closed
//!    \            \
//!     +------------+-> Failed -> Closed
//! ```
//!
//! The channel belongs to the executor alone, so no session lock is held while
//! waiting for output and a live stream never blocks file browsing.

use std::time::Duration;

use futures_util::Stream;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::channel::{ChannelEvent, ExecChannel};
use crate::error::BridgeError;
use crate::ssh::Session;
use crate::terminal::{escape_html, AnsiToMarkupConverter};

/// Most output bytes converted into one chunk
pub const CHUNK_SIZE: usize = 4096;

/// How long one wait for channel output may take before re-polling
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Opening,
    Streaming,
    Draining,
    Closed,
    Failed,
}

/// One piece of converted output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamChunk {
    pub markup: String,
}

pub struct StreamingExecutor {
    state: StreamState,
    channel: Option<Box<dyn ExecChannel>>,
    pending: Vec<u8>,
    converter: AnsiToMarkupConverter,
    exit_status: Option<u32>,
    failure: Option<String>,
}

impl StreamingExecutor {
    /// Open a dedicated channel and start `command` on it.
    ///
    /// Only a missing command or a session that is not connected is an error
    /// here; a channel the remote refuses yields a stream holding one error
    /// chunk.
    pub async fn start(session: &Session, command: &str) -> Result<Self, BridgeError> {
        if command.trim().is_empty() {
            return Err(BridgeError::invalid("No command provided"));
        }

        let mut executor = Self {
            state: StreamState::Opening,
            channel: None,
            pending: Vec::new(),
            converter: AnsiToMarkupConverter::new(),
            exit_status: None,
            failure: None,
        };

        let transport = session.transport()?;
        match transport.open_exec(command).await {
            Ok(channel) => {
                executor.channel = Some(channel);
                executor.state = StreamState::Streaming;
                debug!("Streaming command started: {}", command);
            }
            // Reported inline as the only chunk of the stream
            Err(e) => {
                warn!("Streaming command could not start: {}", e);
                executor.failure = Some(e.to_string());
                executor.state = StreamState::Failed;
            }
        }
        Ok(executor)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Exit status, if the remote reported one before the stream drained
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Next chunk of markup, or `None` once the stream is closed.
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        loop {
            match self.state {
                StreamState::Streaming => {
                    if !self.pending.is_empty() {
                        let take = self.pending.len().min(CHUNK_SIZE);
                        let bytes: Vec<u8> = self.pending.drain(..take).collect();
                        let markup = self.converter.feed(&bytes);
                        if !markup.is_empty() {
                            return Some(StreamChunk { markup });
                        }
                        continue;
                    }
                    self.poll_channel().await;
                }

                StreamState::Draining => {
                    let rest = std::mem::take(&mut self.pending);
                    let mut markup = self.converter.feed(&rest);
                    markup.push_str(&self.converter.finish());

                    self.release().await;
                    self.state = StreamState::Closed;
                    debug!("Stream drained, exit status {:?}", self.exit_status);

                    if !markup.is_empty() {
                        return Some(StreamChunk { markup });
                    }
                }

                StreamState::Failed => {
                    let message = self.failure.take().unwrap_or_default();
                    let mut markup = self.converter.finish();
                    markup.push_str("<br>Error: ");
                    markup.push_str(&escape_html(&message));

                    self.release().await;
                    self.state = StreamState::Closed;
                    return Some(StreamChunk { markup });
                }

                StreamState::Opening | StreamState::Closed => return None,
            }
        }
    }

    /// Wait up to one poll interval for the next channel event
    async fn poll_channel(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            self.state = StreamState::Draining;
            return;
        };

        let event = timeout(POLL_INTERVAL, channel.next_event()).await;
        match event {
            Err(_) => {} // nothing yet, poll again
            Ok(Ok(Some(ChannelEvent::Stdout(data) | ChannelEvent::Stderr(data)))) => {
                self.pending.extend_from_slice(&data);
            }
            Ok(Ok(Some(ChannelEvent::ExitStatus(status)))) => self.exit_status = Some(status),
            Ok(Ok(Some(ChannelEvent::Eof))) | Ok(Ok(None)) => {
                self.state = StreamState::Draining;
            }
            Ok(Err(e)) => {
                warn!("Streaming command failed: {}", e);
                self.failure = Some(e.to_string());
                self.state = StreamState::Failed;
            }
        }
    }

    async fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    /// Adapt into a stream of chunks, ending when the executor closes.
    pub fn into_stream(self) -> impl Stream<Item = StreamChunk> + Send {
        futures_util::stream::unfold(self, |mut executor| async move {
            executor
                .next_chunk()
                .await
                .map(|chunk| (chunk, executor))
        })
    }
}

impl Drop for StreamingExecutor {
    fn drop(&mut self) {
        // Consumer went away mid-stream; release the remote side
        if let Some(mut channel) = self.channel.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        channel.close().await;
                    });
                }
                Err(_) => warn!("No runtime to close abandoned exec channel"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connected_session, MemoryFs, ScriptedTransport, Step};
    use futures_util::StreamExt;
    use std::sync::Arc;

    fn stdout(data: &[u8]) -> Step {
        Step::Event(ChannelEvent::Stdout(data.to_vec()))
    }

    async fn collect(executor: &mut StreamingExecutor) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = executor.next_chunk().await {
            chunks.push(chunk.markup);
        }
        chunks
    }

    #[tokio::test]
    async fn test_split_escape_sequence_matches_one_shot() {
        let writes: [&[u8]; 4] = [b"build \x1b[1;3", b"2mok\x1b", b"[0m\n\xe2\x9c", b"\x93 done\n"];
        let transport = ScriptedTransport::new();
        let mut script: Vec<Step> = writes.iter().map(|w| stdout(w)).collect();
        script.push(Step::Event(ChannelEvent::ExitStatus(0)));
        script.push(Step::Event(ChannelEvent::Eof));
        transport.push_script(script);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "make").await.unwrap();
        let streamed = collect(&mut executor).await.concat();

        assert_eq!(streamed, AnsiToMarkupConverter::convert(&writes.concat()));
        assert_eq!(executor.exit_status(), Some(0));
        assert_eq!(executor.state(), StreamState::Closed);
        assert_eq!(transport.channels_closed(), 1);
    }

    #[tokio::test]
    async fn test_large_output_is_chunked() {
        let transport = ScriptedTransport::new();
        transport.push_script(vec![stdout(&vec![b'a'; CHUNK_SIZE * 2 + 100])]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "yes a").await.unwrap();
        let chunks = collect(&mut executor).await;

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 100]);
    }

    #[tokio::test]
    async fn test_stderr_is_forwarded_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_script(vec![
            stdout(b"one "),
            Step::Event(ChannelEvent::Stderr(b"two ".to_vec())),
            stdout(b"three"),
        ]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "sh").await.unwrap();
        assert_eq!(collect(&mut executor).await.concat(), "one two three");
    }

    #[tokio::test]
    async fn test_quiet_period_is_polled_through() {
        let transport = ScriptedTransport::new();
        transport.push_script(vec![
            stdout(b"start\n"),
            Step::Pause(POLL_INTERVAL * 3),
            stdout(b"end\n"),
        ]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "sleep 1").await.unwrap();
        assert_eq!(collect(&mut executor).await.concat(), "start\nend\n");
    }

    #[tokio::test]
    async fn test_failure_emits_one_error_chunk() {
        let transport = ScriptedTransport::new();
        transport.push_script(vec![
            stdout(b"\x1b[31mhalf"),
            Step::Fail("channel <reset>".to_string()),
            stdout(b"never seen"),
        ]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "tail -f").await.unwrap();
        let chunks = collect(&mut executor).await;

        assert_eq!(
            chunks,
            vec![
                "<span style=\"color: #cd0000\">half".to_string(),
                "</span><br>Error: channel &lt;reset&gt;".to_string(),
            ]
        );
        assert!(executor.next_chunk().await.is_none());
        assert_eq!(transport.channels_closed(), 1);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let transport = ScriptedTransport::new();
        transport.push_output(b"hello\n", 0);

        let session = connected_session(&MemoryFs::new(), &transport);
        let executor = StreamingExecutor::start(&session, "echo hello").await.unwrap();
        let chunks: Vec<StreamChunk> = executor.into_stream().collect().await;

        assert_eq!(
            chunks,
            vec![StreamChunk {
                markup: "hello\n".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_dropping_closes_channel() {
        let transport = ScriptedTransport::new();
        transport.push_script(vec![stdout(b"tick\n"), Step::Pause(Duration::from_secs(60))]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "watch date").await.unwrap();
        assert_eq!(executor.next_chunk().await.unwrap().markup, "tick\n");

        drop(executor);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.channels_closed(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let session = Arc::new(Session::new());
        let err = StreamingExecutor::start(&session, "ls").await.err().unwrap();
        assert!(matches!(err, BridgeError::NotConnected));

        let err = StreamingExecutor::start(&session, " ").await.err().unwrap();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_refused_channel_streams_one_error_chunk() {
        let transport = ScriptedTransport::new();
        transport.fail_open("administratively prohibited");
        let session = connected_session(&MemoryFs::new(), &transport);

        let mut executor = StreamingExecutor::start(&session, "ls").await.unwrap();
        assert_eq!(executor.state(), StreamState::Failed);
        assert_eq!(
            collect(&mut executor).await,
            vec!["<br>Error: administratively prohibited".to_string()]
        );
        assert_eq!(executor.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_character_split_across_writes() {
        let writes: [&[u8]; 2] = [b"gr\xc3", b"\xbcn\xc3\xaf\n"];
        let transport = ScriptedTransport::new();
        transport.push_script(vec![stdout(writes[0]), stdout(writes[1]), Step::Event(ChannelEvent::Eof)]);

        let session = connected_session(&MemoryFs::new(), &transport);
        let mut executor = StreamingExecutor::start(&session, "cat names").await.unwrap();
        let streamed = collect(&mut executor).await.concat();

        assert_eq!(streamed, "grünï\n");
        assert_eq!(streamed, AnsiToMarkupConverter::convert(&writes.concat()));
    }
}
