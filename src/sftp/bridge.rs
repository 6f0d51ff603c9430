//! File system bridge
//!
//! Every operation takes the session's file lease first and holds it until it
//! returns, so concurrent requests never interleave on the SFTP channel.
//! Recursive operations are best-effort: nothing is rolled back on failure.

use std::sync::Arc;

use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::archive::ArchiveJob;
use super::path_utils::{
    file_name, join_remote_path, normalize, parent_path, resolve_containing_directory,
};
use super::remote::{RemoteFs, RemoteWriter};
use super::sqlite_preview;
use super::types::{
    DatabasePreview, DirectoryEntry, DownloadArtifact, EntryKind, Listing, NewItemKind, WriteMode,
};
use crate::error::BridgeError;
use crate::ssh::Session;

pub struct FileSystemBridge {
    session: Arc<Session>,
}

impl FileSystemBridge {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// List a directory; `.` and `..` are skipped and both groups are sorted
    /// case-insensitively by name.
    pub async fn list(&self, path: &str) -> Result<Listing, BridgeError> {
        let fs = self.session.files().await?;
        let path = if path.is_empty() { "/".to_string() } else { normalize(path) };
        debug!("Listing {}", path);

        let mut listing = Listing::default();
        for entry in fs.read_dir(&path).await? {
            if entry.name == "." || entry.name == ".." {
                continue;
            }

            let item = DirectoryEntry {
                path: join_remote_path(&path, &entry.name),
                name: entry.name,
                size: entry.size,
                kind: entry.kind,
            };
            match item.kind {
                EntryKind::Directory => listing.directories.push(item),
                EntryKind::File => listing.files.push(item),
            }
        }

        sort_by_name(&mut listing.directories);
        sort_by_name(&mut listing.files);
        Ok(listing)
    }

    /// Whole file as text; invalid UTF-8 becomes U+FFFD
    pub async fn read_text(&self, path: &str) -> Result<String, BridgeError> {
        let fs = self.session.files().await?;
        let path = normalize(path);

        let mut reader = fs.open_read(&path).await?;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| BridgeError::remote(format!("{}: {}", path, e)))?;

        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Create or truncate `path`, then write `content`.
    pub async fn write_text(&self, path: &str, content: &str) -> Result<(), BridgeError> {
        let fs = self.session.files().await?;
        let path = normalize(path);

        let mut writer = fs.open_write(&path, WriteMode::Truncate).await?;
        write_and_close(&mut writer, content.as_bytes(), &path).await?;

        info!("Wrote {} bytes to {}", content.len(), path);
        Ok(())
    }

    /// Delete a file, or a directory with everything below it.
    pub async fn delete(&self, path: &str) -> Result<(), BridgeError> {
        let fs = self.session.files().await?;
        let path = normalize(path);
        let stat = fs.stat(&path).await?;

        if stat.kind == EntryKind::File || stat.is_link {
            fs.remove_file(&path).await?;
            info!("Deleted {}", path);
            return Ok(());
        }

        let mut failures = Vec::new();
        delete_tree(&**fs, &path, &mut failures).await;

        if failures.is_empty() {
            info!("Deleted directory {}", path);
            Ok(())
        } else {
            warn!("Delete of {} left {} failures", path, failures.len());
            Err(BridgeError::PartialFailure {
                operation: format!("Delete {}", path),
                failures,
            })
        }
    }

    /// Create an empty file or a directory next to (or inside) `parent_path`.
    /// Returns the created path.
    pub async fn create_entry(
        &self,
        parent_path: &str,
        name: &str,
        kind: NewItemKind,
    ) -> Result<String, BridgeError> {
        validate_component(name)?;
        let fs = self.session.files().await?;

        let dir = resolve_containing_directory(&**fs, parent_path).await?;
        let full_path = join_remote_path(&dir, name);

        match kind {
            NewItemKind::Folder => fs.create_dir(&full_path).await?,
            NewItemKind::File => {
                let mut writer = fs.open_write(&full_path, WriteMode::CreateNew).await?;
                write_and_close(&mut writer, b"", &full_path).await?;
            }
        }

        info!("Created {:?} {}", kind, full_path);
        Ok(full_path)
    }

    /// Rename `old_path` within its directory. Returns the new path.
    pub async fn rename(&self, old_path: &str, new_name: &str) -> Result<String, BridgeError> {
        validate_component(new_name)?;
        let fs = self.session.files().await?;

        let old_path = normalize(old_path);
        let new_path = join_remote_path(&parent_path(&old_path), new_name);
        if new_path == old_path {
            return Ok(new_path);
        }

        if fs.exists(&new_path).await? {
            return Err(BridgeError::remote(format!(
                "{}: destination already exists",
                new_path
            )));
        }

        fs.rename(&old_path, &new_path).await?;
        info!("Renamed {} to {}", old_path, new_path);
        Ok(new_path)
    }

    /// Copy a locally staged upload to `parent_path/file_name`.
    ///
    /// The staging file is consumed and removed whatever the outcome.
    pub async fn upload(
        &self,
        parent_path: &str,
        local_file: TempPath,
        file_name_hint: &str,
    ) -> Result<String, BridgeError> {
        // Browsers may send a full client-side path
        let name = file_name(file_name_hint);
        validate_component(&name)?;

        let fs = self.session.files().await?;
        let dir = resolve_containing_directory(&**fs, parent_path).await?;
        let remote_path = join_remote_path(&dir, &name);

        let mut local = tokio::fs::File::open(&local_file).await?;
        let mut writer = fs.open_write(&remote_path, WriteMode::Truncate).await?;

        let copied = tokio::io::copy(&mut local, &mut writer)
            .await
            .map_err(|e| BridgeError::remote(format!("{}: {}", remote_path, e)))?;
        write_and_close(&mut writer, b"", &remote_path).await?;

        info!("Uploaded {} bytes to {}", copied, remote_path);
        Ok(remote_path)
    }

    /// Stage a file, or a zip of a directory, on local disk.
    pub async fn download(&self, path: &str) -> Result<DownloadArtifact, BridgeError> {
        let fs = self.session.files().await?;
        let path = normalize(path);
        let stat = fs.stat(&path).await?;

        let name = match file_name(&path) {
            n if n.is_empty() => "root".to_string(),
            n => n,
        };

        if stat.kind == EntryKind::Directory {
            let archive = ArchiveJob::new(&**fs, &path, &name).build().await?;
            return Ok(DownloadArtifact {
                local_file: archive,
                suggested_name: format!("{}.zip", name),
                is_archive: true,
            });
        }

        let local_file = fetch_to_temp(&**fs, &path).await?;
        info!("Downloaded {} ({} bytes)", path, stat.size);
        Ok(DownloadArtifact {
            local_file,
            suggested_name: name,
            is_archive: false,
        })
    }

    /// Tables, columns and first rows of a remote SQLite database.
    pub async fn preview_database(&self, path: &str) -> Result<DatabasePreview, BridgeError> {
        let path = normalize(path);
        let local = {
            let fs = self.session.files().await?;
            if fs.stat(&path).await?.kind == EntryKind::Directory {
                return Err(BridgeError::invalid(format!("{} is a directory", path)));
            }
            fetch_to_temp(&**fs, &path).await?
        };

        let remote = path.clone();
        tokio::task::spawn_blocking(move || {
            let preview = sqlite_preview::preview_database(&local);
            drop(local);
            preview.map_err(|e| BridgeError::remote(format!("{}: {}", remote, e)))
        })
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?
    }
}

fn sort_by_name(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// A new name must be exactly one path component
fn validate_component(name: &str) -> Result<(), BridgeError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BridgeError::invalid(format!("Invalid name: {:?}", name)));
    }
    Ok(())
}

async fn write_and_close(
    writer: &mut RemoteWriter,
    content: &[u8],
    path: &str,
) -> Result<(), BridgeError> {
    let io_err = |e: std::io::Error| BridgeError::remote(format!("{}: {}", path, e));
    writer.write_all(content).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;
    writer.shutdown().await.map_err(io_err)
}

async fn fetch_to_temp(fs: &dyn RemoteFs, path: &str) -> Result<TempPath, BridgeError> {
    let staging = tempfile::Builder::new()
        .prefix("vps-explorer-")
        .tempfile()?;

    let mut reader = fs.open_read(path).await?;
    let mut local = tokio::fs::File::from_std(staging.as_file().try_clone()?);
    tokio::io::copy(&mut reader, &mut local)
        .await
        .map_err(|e| BridgeError::remote(format!("{}: {}", path, e)))?;
    local.flush().await?;

    Ok(staging.into_temp_path())
}

/// Depth-first removal that keeps going past failures. Returns whether `dir`
/// itself was removed; a directory whose subtree failed is left in place.
async fn delete_tree(fs: &dyn RemoteFs, dir: &str, failures: &mut Vec<String>) -> bool {
    let entries = match fs.read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            failures.push(e.to_string());
            return false;
        }
    };

    let mut clean = true;
    for entry in entries {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let child = join_remote_path(dir, &entry.name);

        let removed = if entry.kind == EntryKind::Directory && !entry.is_link {
            Box::pin(delete_tree(fs, &child, failures)).await
        } else {
            match fs.remove_file(&child).await {
                Ok(()) => true,
                Err(e) => {
                    failures.push(e.to_string());
                    false
                }
            }
        };
        clean &= removed;
    }

    if !clean {
        return false;
    }

    match fs.remove_dir(dir).await {
        Ok(()) => true,
        Err(e) => {
            failures.push(e.to_string());
            false
        }
    }
}
