//! Content hashing for change detection and build-cache keys.
//!
//! Two hash flavors exist for every path. The layer hash answers "did this
//! file change since the last snapshot?" and therefore folds in every piece
//! of metadata that must trigger a new layer, including mtime. The cache
//! hash is the same digest with mtime excluded, so rebuilds of identical
//! content produce the same cache key across runs.

use std::fs::File;
use std::io::{BufReader, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use lamina_core::error::{LaminaError, Result};
use sha2::{Digest, Sha256};

/// Content-identity string for one path (lowercase hex SHA-256).
pub type FileHash = String;

/// Hash a path for layer change detection.
///
/// Incorporates mode, ownership, mtime, file type, content, and for
/// symlinks the link target. Directories hash from their metadata only,
/// never from their children.
pub fn layer_hash(path: &Path) -> Result<FileHash> {
    hash_path(path, true)
}

/// Hash a path for build-cache keys. Identical to [`layer_hash`] except
/// mtime is excluded.
pub fn cache_hash(path: &Path) -> Result<FileHash> {
    hash_path(path, false)
}

fn hash_path(path: &Path, include_mtime: bool) -> Result<FileHash> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| hash_error(path, &e))?;

    let mut hasher = Sha256::new();
    // mode() carries the file type bits, so type changes alter the hash too.
    hasher.update(meta.mode().to_le_bytes());
    hasher.update(meta.uid().to_le_bytes());
    hasher.update(meta.gid().to_le_bytes());
    if include_mtime {
        hasher.update(meta.mtime().to_le_bytes());
        hasher.update(meta.mtime_nsec().to_le_bytes());
    }

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| hash_error(path, &e))?;
        hasher.update(target.as_os_str().as_bytes());
    } else if file_type.is_file() {
        let file = File::open(path).map_err(|e| hash_error(path, &e))?;
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader.read(&mut buffer).map_err(|e| hash_error(path, &e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }
    // Directories and special nodes contribute metadata only.

    Ok(hex::encode(hasher.finalize()))
}

fn hash_error(path: &Path, err: &std::io::Error) -> LaminaError {
    LaminaError::HashError {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// SHA-256 digest of raw bytes as lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
