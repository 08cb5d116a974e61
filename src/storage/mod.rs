//! On-disk layout: the root CA key/certificate, the combined CA bundle, and
//! the proxy state record, all under a per-user directory with owner-only
//! permissions.

use std::path::{Path, PathBuf};

use rama::error::{ErrorContext as _, OpaqueError};

pub mod state;

const DATA_DIR_NAME: &str = ".safe-chain";

/// Resolves (and creates, owner-only) the data directory holding the root
/// CA, the combined CA bundle, and the proxy state record.
pub fn resolve_data_dir(data_dir: Option<&Path>) -> Result<PathBuf, OpaqueError> {
    let dir = match data_dir {
        Some(dir) => dir.to_owned(),
        None => {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| OpaqueError::from_display("HOME is not set"))?;
            home.join(DATA_DIR_NAME)
        }
    };

    create_owner_only_dir(&dir)
        .with_context(|| format!("create safe-chain data directory '{}'", dir.display()))?;

    Ok(dir)
}

#[cfg(unix)]
fn create_owner_only_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn create_owner_only_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Writes `contents` to `path` with owner-only permissions, replacing any
/// existing file atomically (write to a sibling temp file, then rename).
pub fn write_owner_only_file(path: &Path, contents: &[u8]) -> Result<(), OpaqueError> {
    let parent = path
        .parent()
        .ok_or_else(|| OpaqueError::from_display("path has no parent directory"))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    ));

    write_owner_only_file_inner(&tmp_path, contents)
        .with_context(|| format!("write temp file '{}'", tmp_path.display()))?;

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename '{}' -> '{}'", tmp_path.display(), path.display()))
}

#[cfg(unix)]
fn write_owner_only_file_inner(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt as _;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    std::io::Write::write_all(&mut file, contents)
}

#[cfg(not(unix))]
fn write_owner_only_file_inner(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
