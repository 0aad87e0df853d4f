//! Overlay package assembly for game-mod installations.
//!
//! This library resolves a mod's dependency graph, materializes each mod's
//! declared assets into an in-memory virtual file tree, and merges those
//! trees into a target installation directory under per-entry merge
//! policies. Content retrieval, archive decoding, and INI handling are
//! pluggable collaborators (see [`Services`]); the shipped defaults cover
//! HTTP(S), GitHub release resolution, local files, and structure-preserving
//! INI merges. Archive container codecs are registered by the integrator.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modfold::{Installation, Services, Url};
//!
//! # fn main() -> modfold::Result<()> {
//! let mut installation = Installation::open("/games/derail-valley", Services::default())?;
//! installation.install(&Url::parse("https://github.com/example/mod/release").unwrap())?;
//! installation.apply()?;
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline is synchronous and single-threaded end-to-end; the folded
//! tree is fully assembled in memory before anything is written to disk.

pub mod error;
pub mod install;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod services;
pub mod tree;


pub use error::{Error, Result};
pub use install::{InstallState, Installation};
pub use model::{
    Mod, ModAsset, ModData, ModDependency, ModVersion, Processor, VersionBehaviour,
};
pub use services::{
    ArchiveReader, ExtractRegistry, Extracted, FetchChain, FetchConfig, FetchHandler,
    FetchRegistry, IniMergeOptions, IniMerger, Services, StructuredIniMerger,
};
pub use tree::{FileData, FileTree, NodeId, TreeItem};
pub use url::Url;
