//! File browsing types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tempfile::TempPath;

/// What an entry is, after following symbolic links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of a remote `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    pub size: u64,
    /// The path itself is a symbolic link
    pub is_link: bool,
}

/// Raw directory entry as read from the remote, `.` and `..` included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub is_link: bool,
}

/// How `open_write` treats an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or truncate
    Truncate,
    /// Fail if the path already exists
    CreateNew,
}

/// One listed file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Forward-slash normalized full path
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Directory listing, directories and files kept apart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<DirectoryEntry>,
}

/// Kind of item created by `create_entry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewItemKind {
    File,
    #[serde(alias = "directory")]
    Folder,
}

/// A downloaded file or directory archive staged on local disk
///
/// The staging file is removed when the artifact is dropped.
#[derive(Debug)]
pub struct DownloadArtifact {
    pub local_file: TempPath,
    pub suggested_name: String,
    pub is_archive: bool,
}

/// First rows of one SQLite table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Table name to preview
pub type DatabasePreview = BTreeMap<String, TablePreview>;
