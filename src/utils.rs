//! Utility functions for Forkpoint
//!
//! Hashing helpers, atomic file writes, path manipulation and recursive
//! directory copies used by export/import.

use crate::error::{ForkpointError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Hash arbitrary data using SHA-256
///
/// Returns the hash as a 64-character hexadecimal string.
///
/// ```rust,ignore
/// let hash = hash_data(b"Hello, world!");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a sequence of byte fields, separated so that field boundaries matter
pub fn hash_fields<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

/// Write a file atomically
///
/// Content goes to a temporary file in the same directory, which is then
/// renamed over the target. Readers see either the old or the new content.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.flush()?;
    // Keep the mode of the file being replaced
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }
    temp.persist(path).map_err(|e| ForkpointError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// First eight characters of an object or commit id, for log lines
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Whether `id` has the shape of a SHA-256 commit id
pub fn is_full_id(id: &str) -> bool {
    id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Convert an absolute path to a path relative to `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(|p| p.to_path_buf())
        .map_err(|_| ForkpointError::internal(format!("{:?} is not inside {:?}", path, base)))
}

/// Normalize a relative path to forward-slash form for use as a tree key
pub fn path_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove a directory if it is empty; returns whether it was removed
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        return Ok(true);
    }
    Ok(false)
}

/// Recursively copy `src` into `dst`, creating `dst` if needed
///
/// Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = make_relative(entry.path(), src)?;
        let target = dst.join(&relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    trace!("Copied {} files from {:?} to {:?}", copied, src, dst);
    Ok(copied)
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_data() {
        let hash = hash_data(b"Hello, world!");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_data(b"Hello, world!"));
        assert_ne!(hash, hash_data(b"Hello, world"));
    }

    #[test]
    fn test_hash_fields_boundaries() {
        let a = hash_fields([b"ab".as_slice(), b"c".as_slice()]);
        let b = hash_fields([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/file.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_short_id_handles_short_input() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
        assert!(is_full_id(&hash_data(b"x")));
        assert!(!is_full_id("abc"));
    }

    #[test]
    fn test_path_key() {
        assert_eq!(path_key(Path::new("src/main.py")), "src/main.py");
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), "c").unwrap();
        fs::write(src.path().join("top.txt"), "t").unwrap();

        let copied = copy_dir_recursive(src.path(), &dst.path().join("out")).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.path().join("out/a/b/c.txt")).unwrap(), "c");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}
