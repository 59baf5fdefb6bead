//! Local state locations and file persistence helpers.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

use crate::error::StoreError;

/// Cached authentication artifact file name.
pub const TOKEN_FILE: &str = "token.json";

/// Status history file name.
pub const HISTORY_FILE: &str = "status_history.json";

/// Get the platform data directory for lsac-watch.
///
/// Returns `~/.local/share/lsac-watch` on Linux and
/// `~/Library/Application Support/org.lsac-watch.lsac-watch` on macOS.
pub fn default_state_dir() -> PathBuf {
    ProjectDirs::from("org", "lsac-watch", "lsac-watch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lsac-watch"))
}

/// Resolve the state directory from a configured value, falling back to the platform default.
pub fn resolve_state_dir(configured: &str) -> PathBuf {
    if configured.trim().is_empty() {
        default_state_dir()
    } else {
        PathBuf::from(configured)
    }
}

/// Write `content` to `path` so that readers see either the old or the new file, never a mix.
///
/// The data goes to a sibling temp file first and is then renamed over the target.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    write_private(&temp_path, content).map_err(io_err)?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(e));
    }

    debug!("Wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(path, content)
}
