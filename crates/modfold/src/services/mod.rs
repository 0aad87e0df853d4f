//! Collaborator contracts consumed by the core, and their shipped defaults.

pub mod extract;
pub mod fetch;
pub mod ini;

pub use extract::{ArchiveReader, ExtractRegistry, Extracted};
pub use fetch::{FetchChain, FetchConfig, FetchHandler, FetchRegistry, GithubReleases, HttpFetch, LocalFile};
pub use ini::{IniMergeOptions, IniMerger, StructuredIniMerger};

use std::sync::Arc;

/// The collaborators one installation works against.
///
/// The default wires the stock fetch chain, an empty extractor registry
/// (container codecs are integrator-registered), and the structure-preserving
/// INI merger.
pub struct Services {
    pub fetch: FetchRegistry,
    pub extract: ExtractRegistry,
    pub ini: Arc<dyn IniMerger>,
}

impl Default for Services {
    fn default() -> Self {
        Services {
            fetch: FetchRegistry::default(),
            extract: ExtractRegistry::new(),
            ini: Arc::new(StructuredIniMerger),
        }
    }
}
