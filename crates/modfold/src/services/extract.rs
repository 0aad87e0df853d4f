//! Archive decoding behind a reader registry.
//!
//! The core never decodes containers itself; integrators register
//! [`ArchiveReader`] implementations (zip, 7z, …) and the registry tries
//! them in order, first success wins. Every reader's failure is kept and
//! aggregated into one [`Error::UnsupportedFormat`] when none matched.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Error, Result};
use crate::tree::{FileTree, NodeId};

/// Decodes one archive container format into a file tree.
pub trait ArchiveReader: Send + Sync {
    /// Decode `data`; an error means "not my format".
    fn read(&self, data: &[u8]) -> Result<FileTree>;
}

/// An extracted archive, possibly restricted to a sub-root.
#[derive(Debug)]
pub struct Extracted {
    pub tree: FileTree,
    /// The node the caller should treat as the archive root; the tree root
    /// unless a sub-root was requested.
    pub root: NodeId,
}

/// Ordered list of archive readers.
pub struct ExtractRegistry {
    readers: Mutex<Vec<Arc<dyn ArchiveReader>>>,
}

impl ExtractRegistry {
    pub fn new() -> Self {
        ExtractRegistry {
            readers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, reader: Arc<dyn ArchiveReader>) {
        self.readers.lock().unwrap().push(reader);
    }

    /// Decode `data` with the first reader that accepts it, optionally
    /// re-rooted at `sub_root` (NotFound when that path is absent).
    pub fn read(&self, data: &[u8], sub_root: Option<&str>) -> Result<Extracted> {
        let readers = self.readers.lock().unwrap().clone();
        let mut failures = Vec::new();
        for (index, reader) in readers.iter().enumerate() {
            match reader.read(data) {
                Ok(tree) => {
                    let root = match sub_root.filter(|p| !p.is_empty()) {
                        Some(path) => tree.get_path(tree.root(), path)?.ok_or_else(|| {
                            Error::not_found(format!("archive sub-root '{path}'"))
                        })?,
                        None => tree.root(),
                    };
                    return Ok(Extracted { tree, root });
                }
                Err(e) => {
                    debug!(reader = index, error = %e, "archive reader declined");
                    failures.push(format!("reader #{index}: {e}"));
                }
            }
        }
        Err(Error::UnsupportedFormat { failures })
    }
}

impl Default for ExtractRegistry {
    fn default() -> Self {
        Self::new()
    }
}
