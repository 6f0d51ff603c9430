//! Remote path utilities
//!
//! Remote SFTP paths always use `/` as separator (per SFTP protocol). Paths
//! typed on a Windows client may arrive with `\`, so everything is normalized
//! before it reaches the remote.

use super::remote::RemoteFs;
use super::types::EntryKind;
use crate::error::BridgeError;

/// Replace every `\` with `/`.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
///
/// An absolute `component` replaces `base`, as with `Path::join`.
///
/// # Examples
/// ```
/// # use vps_explorer::sftp::path_utils::join_remote_path;
/// assert_eq!(join_remote_path("/home", "file.txt"), "/home/file.txt");
/// assert_eq!(join_remote_path("/home", "/etc/hosts"), "/etc/hosts");
/// ```
pub fn join_remote_path(base: &str, component: &str) -> String {
    let base = normalize(base);
    let component = normalize(component);

    if is_absolute_remote_path(&component) || base.is_empty() {
        component
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Syntactic parent directory: `/a/b.txt` gives `/a`, `/a` gives `/`, and a
/// bare name gives the empty string.
pub fn parent_path(path: &str) -> String {
    let path = normalize(path);
    let trimmed = trim_trailing_slashes(&path);

    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => String::new(),
    }
}

/// Last path component, ignoring trailing slashes.
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    let trimmed = trim_trailing_slashes(&path);

    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Directory a new item should go into when the caller points at `path`:
/// an existing file resolves to its parent, an existing directory to itself,
/// and a path that cannot be stat'ed to its syntactic parent.
pub async fn resolve_containing_directory(
    fs: &dyn RemoteFs,
    path: &str,
) -> Result<String, BridgeError> {
    let path = normalize(path);
    match fs.stat(&path).await {
        Ok(stat) if stat.kind == EntryKind::Directory => Ok(path),
        _ => Ok(parent_path(&path)),
    }
}
