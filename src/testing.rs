//! In-memory stand-ins for the remote host, used by unit tests

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::error::BridgeError;
use crate::exec::{ChannelEvent, ExecChannel, ExecTransport};
use crate::sftp::path_utils::parent_path;
use crate::sftp::remote::{RemoteFs, RemoteReader, RemoteWriter};
use crate::sftp::types::{EntryKind, RemoteDirEntry, RemoteStat, WriteMode};
use crate::ssh::Session;

// ============================================================================
// Filesystem
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Stat,
    ReadDir,
    Read,
    Write,
    CreateDir,
    RemoveFile,
    RemoveDir,
    Rename,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
    Link(String),
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    denied: HashSet<(FsOp, String)>,
    closed: bool,
}

impl Tree {
    fn check(&self, op: FsOp, path: &str) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::remote("SFTP session closed"));
        }
        if self.denied.contains(&(op, path.to_string())) {
            return Err(BridgeError::remote(format!("{}: Permission denied", path)));
        }
        Ok(())
    }

    /// Follow at most a few links; dangling links resolve to `None`
    fn resolve(&self, path: &str) -> Option<&Node> {
        let mut current = path.to_string();
        for _ in 0..8 {
            match self.nodes.get(&current)? {
                Node::Link(target) => current = target.clone(),
                node => return Some(node),
            }
        }
        None
    }

    fn children(&self, dir: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() != "/" && parent_path(p) == dir)
            .cloned()
            .collect()
    }
}

fn missing(path: &str) -> BridgeError {
    BridgeError::remote(format!("{}: No such file", path))
}

/// Shared in-memory remote filesystem. Clones see the same tree.
#[derive(Clone)]
pub struct MemoryFs {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut tree = Tree::default();
        tree.nodes.insert("/".to_string(), Node::Dir);
        Self {
            tree: Arc::new(Mutex::new(tree)),
        }
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.tree.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = format!("{}/{}", current, part);
            tree.nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.add_dir(&parent_path(path));
        self.tree
            .lock()
            .nodes
            .insert(path.to_string(), Node::File(content.to_vec()));
    }

    pub fn add_link(&self, path: &str, target: &str) {
        self.add_dir(&parent_path(path));
        self.tree
            .lock()
            .nodes
            .insert(path.to_string(), Node::Link(target.to_string()));
    }

    pub fn deny(&self, op: FsOp, path: &str) {
        self.tree.lock().denied.insert((op, path.to_string()));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tree.lock().nodes.contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Every path strictly below `dir`
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.tree
            .lock()
            .nodes
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.tree.lock().closed
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn stat(&self, path: &str) -> Result<RemoteStat, BridgeError> {
        let tree = self.tree.lock();
        tree.check(FsOp::Stat, path)?;
        let is_link = matches!(tree.nodes.get(path), Some(Node::Link(_)));
        match (tree.nodes.contains_key(path), tree.resolve(path)) {
            (_, Some(Node::Dir)) => Ok(RemoteStat {
                kind: EntryKind::Directory,
                size: 4096,
                is_link,
            }),
            (_, Some(Node::File(data))) => Ok(RemoteStat {
                kind: EntryKind::File,
                size: data.len() as u64,
                is_link,
            }),
            (true, _) => Ok(RemoteStat {
                kind: EntryKind::File,
                size: 0,
                is_link,
            }),
            (false, _) => Err(missing(path)),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BridgeError> {
        let tree = self.tree.lock();
        tree.check(FsOp::ReadDir, path)?;
        if !matches!(tree.resolve(path), Some(Node::Dir)) {
            return Err(missing(path));
        }

        let mut entries: Vec<RemoteDirEntry> = [".", ".."]
            .into_iter()
            .map(|name| RemoteDirEntry {
                name: name.to_string(),
                kind: EntryKind::Directory,
                size: 4096,
                is_link: false,
            })
            .collect();
        // Reverse order so callers cannot rely on the tree being sorted
        for child in tree.children(path).into_iter().rev() {
            let name = child.rsplit('/').next().unwrap_or_default().to_string();
            let (kind, size) = match tree.resolve(&child) {
                Some(Node::Dir) => (EntryKind::Directory, 4096),
                Some(Node::File(data)) => (EntryKind::File, data.len() as u64),
                _ => (EntryKind::File, 0),
            };
            let is_link = matches!(tree.nodes.get(&child), Some(Node::Link(_)));
            entries.push(RemoteDirEntry {
                name,
                kind,
                size,
                is_link,
            });
        }
        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, BridgeError> {
        let tree = self.tree.lock();
        tree.check(FsOp::Read, path)?;
        match tree.resolve(path) {
            Some(Node::File(data)) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Some(_) => Err(BridgeError::remote(format!("{}: Is a directory", path))),
            None => Err(missing(path)),
        }
    }

    async fn open_write(&self, path: &str, mode: WriteMode) -> Result<RemoteWriter, BridgeError> {
        let mut tree = self.tree.lock();
        tree.check(FsOp::Write, path)?;
        if !matches!(tree.resolve(&parent_path(path)), Some(Node::Dir)) {
            return Err(missing(path));
        }
        match (tree.nodes.get(path), mode) {
            (Some(_), WriteMode::CreateNew) => {
                return Err(BridgeError::remote(format!("{}: File exists", path)))
            }
            (Some(Node::Dir), WriteMode::Truncate) => {
                return Err(BridgeError::remote(format!("{}: Is a directory", path)))
            }
            _ => {}
        }
        tree.nodes.insert(path.to_string(), Node::File(Vec::new()));

        Ok(Box::new(MemoryWriter {
            tree: self.tree.clone(),
            path: path.to_string(),
        }))
    }

    async fn create_dir(&self, path: &str) -> Result<(), BridgeError> {
        let mut tree = self.tree.lock();
        tree.check(FsOp::CreateDir, path)?;
        if tree.nodes.contains_key(path) {
            return Err(BridgeError::remote(format!("{}: File exists", path)));
        }
        if !matches!(tree.resolve(&parent_path(path)), Some(Node::Dir)) {
            return Err(missing(path));
        }
        tree.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), BridgeError> {
        let mut tree = self.tree.lock();
        tree.check(FsOp::RemoveFile, path)?;
        match tree.nodes.get(path) {
            Some(Node::Dir) => Err(BridgeError::remote(format!("{}: Is a directory", path))),
            Some(_) => {
                tree.nodes.remove(path);
                Ok(())
            }
            None => Err(missing(path)),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<(), BridgeError> {
        let mut tree = self.tree.lock();
        tree.check(FsOp::RemoveDir, path)?;
        match tree.nodes.get(path) {
            Some(Node::Dir) if !tree.children(path).is_empty() => Err(BridgeError::remote(
                format!("{}: Directory not empty", path),
            )),
            Some(Node::Dir) => {
                tree.nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(BridgeError::remote(format!("{}: Not a directory", path))),
            None => Err(missing(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BridgeError> {
        let mut tree = self.tree.lock();
        tree.check(FsOp::Rename, from)?;
        if !tree.nodes.contains_key(from) {
            return Err(missing(from));
        }

        let prefix = format!("{}/", from);
        let moved: Vec<String> = tree
            .nodes
            .keys()
            .filter(|p| p.as_str() == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = tree.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                tree.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, BridgeError> {
        let tree = self.tree.lock();
        tree.check(FsOp::Stat, path)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn close(&self) {
        self.tree.lock().closed = true;
    }
}

/// Appends straight into the tree
struct MemoryWriter {
    tree: Arc<Mutex<Tree>>,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut tree = self.tree.lock();
        match tree.nodes.get_mut(&self.path) {
            Some(Node::File(data)) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                "file removed while writing",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// Exec transport
// ============================================================================

/// One scripted step of a fake command
#[derive(Debug, Clone)]
pub enum Step {
    Event(ChannelEvent),
    Fail(String),
    Pause(Duration),
}

#[derive(Default)]
struct TransportState {
    scripts: VecDeque<Vec<Step>>,
    commands: Vec<String>,
    channels_closed: usize,
    disconnected: bool,
    open_error: Option<String>,
}

/// Replays queued scripts, one per opened channel. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, steps: Vec<Step>) {
        self.state.lock().scripts.push_back(steps);
    }

    /// Queue a command that prints `stdout` and exits with `status`
    pub fn push_output(&self, stdout: &[u8], status: u32) {
        self.push_script(vec![
            Step::Event(ChannelEvent::Stdout(stdout.to_vec())),
            Step::Event(ChannelEvent::Eof),
            Step::Event(ChannelEvent::ExitStatus(status)),
        ]);
    }

    pub fn fail_open(&self, message: &str) {
        self.state.lock().open_error = Some(message.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn channels_closed(&self) -> usize {
        self.state.lock().channels_closed
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().disconnected
    }
}

#[async_trait]
impl ExecTransport for ScriptedTransport {
    async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, BridgeError> {
        let mut state = self.state.lock();
        if let Some(message) = state.open_error.clone() {
            return Err(BridgeError::remote(message));
        }
        state.commands.push(command.to_string());
        let steps = state.scripts.pop_front().unwrap_or_default();

        Ok(Box::new(ScriptedChannel {
            steps: steps.into(),
            state: self.state.clone(),
        }))
    }

    fn is_alive(&self) -> bool {
        !self.state.lock().disconnected
    }

    async fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }
}

struct ScriptedChannel {
    steps: VecDeque<Step>,
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl ExecChannel for ScriptedChannel {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, BridgeError> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => return Ok(Some(event)),
                Some(Step::Fail(message)) => return Err(BridgeError::remote(message)),
                Some(Step::Pause(duration)) => tokio::time::sleep(duration).await,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.state.lock().channels_closed += 1;
    }
}

/// A connected session over the given fakes
pub fn connected_session(fs: &MemoryFs, transport: &ScriptedTransport) -> Arc<Session> {
    Arc::new(Session::from_parts(
        Box::new(fs.clone()),
        Arc::new(transport.clone()),
    ))
}
