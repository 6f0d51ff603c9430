//! Directory download as a zip archive
//!
//! The remote tree is walked depth-first on the async side and every file is
//! read in bounded chunks. Compression and disk writes happen on a blocking
//! thread that receives entries over a bounded channel, so no remote file is
//! ever held in memory whole and the runtime workers never block on the zip.
//! Entries are named `root/relative/path`; directories get a `root/sub/` entry.

use std::fs::File;
use std::io::Write;

use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::path_utils::join_remote_path;
use super::remote::RemoteFs;
use super::types::EntryKind;
use crate::error::BridgeError;

/// Read size for streaming remote files into the archive
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks in flight between the walk and the zip writer
const QUEUE_DEPTH: usize = 8;

/// One step for the zip writer thread
enum ZipOp {
    Directory(String),
    File(String),
    Data(Vec<u8>),
}

/// Walk state for one directory download
pub(super) struct ArchiveJob<'a> {
    fs: &'a dyn RemoteFs,
    remote_root: String,
    archive_root_name: String,
}

impl<'a> ArchiveJob<'a> {
    pub(super) fn new(fs: &'a dyn RemoteFs, remote_root: &str, archive_root_name: &str) -> Self {
        Self {
            fs,
            remote_root: remote_root.to_string(),
            archive_root_name: archive_root_name.to_string(),
        }
    }

    /// Build the archive into a local temporary file.
    ///
    /// On failure the partial archive is deleted and the failing step is
    /// reported as a `PartialFailure`.
    pub(super) async fn build(self) -> Result<TempPath, BridgeError> {
        info!("Archiving {} as {}.zip", self.remote_root, self.archive_root_name);

        let staging = tempfile::Builder::new()
            .prefix("vps-explorer-")
            .suffix(".zip")
            .tempfile()?;
        let file = staging.as_file().try_clone()?;

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::task::spawn_blocking(move || write_archive(file, rx));

        let mut entries = 0usize;
        let walked = self
            .add_dir(&tx, &self.remote_root, &self.archive_root_name, &mut entries)
            .await;
        drop(tx);

        let written = writer
            .await
            .map_err(|e| format!("archive writer: {}", e))
            .and_then(|result| result);

        // A dead writer also fails the walk; its own error says why
        let finished = match (walked, written) {
            (_, Err(step)) | (Err(step), Ok(())) => Err(step),
            (Ok(()), Ok(())) => Ok(()),
        };

        match finished {
            Ok(()) => {
                debug!("Archive of {} holds {} entries", self.remote_root, entries);
                Ok(staging.into_temp_path())
            }
            Err(step) => {
                drop(staging);
                Err(BridgeError::PartialFailure {
                    operation: format!("Archive {}", self.remote_root),
                    failures: vec![step],
                })
            }
        }
    }

    async fn add_dir(
        &self,
        zip: &mpsc::Sender<ZipOp>,
        remote_dir: &str,
        zip_dir: &str,
        entries: &mut usize,
    ) -> Result<(), String> {
        let listing = self
            .fs
            .read_dir(remote_dir)
            .await
            .map_err(|e| format!("list {}", e))?;

        for entry in listing {
            if entry.name == "." || entry.name == ".." {
                continue;
            }

            let remote_item = join_remote_path(remote_dir, &entry.name);
            let zip_item = format!("{}/{}", zip_dir, entry.name);

            if entry.kind == EntryKind::Directory {
                send(zip, ZipOp::Directory(format!("{}/", zip_item))).await?;
                *entries += 1;

                // Linked directories are recorded but not followed
                if !entry.is_link {
                    Box::pin(self.add_dir(zip, &remote_item, &zip_item, entries)).await?;
                }
            } else {
                self.add_file(zip, &remote_item, zip_item).await?;
                *entries += 1;
            }
        }

        Ok(())
    }

    async fn add_file(
        &self,
        zip: &mpsc::Sender<ZipOp>,
        remote_item: &str,
        zip_item: String,
    ) -> Result<(), String> {
        let mut reader = self
            .fs
            .open_read(remote_item)
            .await
            .map_err(|e| format!("open {}", e))?;

        send(zip, ZipOp::File(zip_item)).await?;

        loop {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| format!("read {}: {}", remote_item, e))?;
            if n == 0 {
                break;
            }
            buffer.truncate(n);
            send(zip, ZipOp::Data(buffer)).await?;
        }

        Ok(())
    }
}

async fn send(zip: &mpsc::Sender<ZipOp>, op: ZipOp) -> Result<(), String> {
    zip.send(op)
        .await
        .map_err(|_| "archive writer stopped".to_string())
}

/// Blocking side: apply queued entries until the walk hangs up, then finalize.
fn write_archive(file: File, mut ops: mpsc::Receiver<ZipOp>) -> Result<(), String> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut current = String::new();
    while let Some(op) = ops.blocking_recv() {
        match op {
            ZipOp::Directory(name) => zip
                .add_directory(name.as_str(), options)
                .map_err(|e| format!("add directory {}: {}", name, e))?,
            ZipOp::File(name) => {
                zip.start_file(name.as_str(), options)
                    .map_err(|e| format!("add file {}: {}", name, e))?;
                current = name;
            }
            ZipOp::Data(bytes) => zip
                .write_all(&bytes)
                .map_err(|e| format!("write {}: {}", current, e))?,
        }
    }

    zip.finish()
        .map(|_| ())
        .map_err(|e| format!("finalize archive: {}", e))
}
