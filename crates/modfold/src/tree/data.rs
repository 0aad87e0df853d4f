//! File content sources for tree nodes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Content behind a file node: either an in-memory snapshot or a lazy
/// reference to a file on disk.
///
/// Reads always yield an independent buffer, so no two readers can observe a
/// shared mutable source. Cloning is cheap; memory snapshots are shared
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileData(Source);

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Memory(Arc<[u8]>),
    External(PathBuf),
}

impl FileData {
    /// Snapshot `bytes` in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        FileData(Source::Memory(bytes.into().into()))
    }

    /// Reference a file on disk without reading it yet.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        FileData(Source::External(path.into()))
    }

    /// Read the content into a fresh buffer.
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.0 {
            Source::Memory(bytes) => Ok(bytes.to_vec()),
            Source::External(path) => fs::read(path).map_err(|e| Error::io(path, e)),
        }
    }

    /// Write the content to `dest`, overwriting whatever is there.
    ///
    /// A no-op when the source already is `dest`.
    pub fn apply(&self, dest: &Path) -> Result<()> {
        match &self.0 {
            Source::External(path) if path == dest => Ok(()),
            Source::External(path) => fs::copy(path, dest)
                .map(|_| ())
                .map_err(|e| Error::io(dest, e)),
            Source::Memory(bytes) => fs::write(dest, bytes).map_err(|e| Error::io(dest, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_independent_copies() {
        let data = FileData::from_bytes(b"payload".to_vec());
        let a = data.read().unwrap();
        let b = data.read().unwrap();
        assert_eq!(a, b"payload");
        assert_eq!(a, b);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn apply_writes_memory_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        FileData::from_bytes(b"hello".to_vec()).apply(&dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn apply_is_noop_for_identical_external_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.ini");
        std::fs::write(&file, b"original").unwrap();

        FileData::from_path(&file).apply(&file).unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn apply_copies_external_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        std::fs::write(&src, b"content").unwrap();

        FileData::from_path(&src).apply(&dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"content");
    }
}
