//! Mod descriptor data model.
//!
//! These types mirror the persisted JSON descriptor format (PascalCase
//! property names, enums as variant names) and the runtime state the
//! installer keeps per mod.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::tree::FileTree;

/// URI scheme reserved for assets pointing into the mod's own bundle.
pub const SELF_REFERENCE_SCHEME: &str = "dvmod";
/// Host component of a self-reference URI.
pub const SELF_REFERENCE_HOST: &str = "current-archive";
/// Asset manifest read from a bundle's archive root.
pub const BUNDLE_MANIFEST: &str = "meta.json";
/// Mod descriptor read from a bundle's archive root.
pub const BUNDLE_DESCRIPTOR: &str = "dvmod.json";

/// Merge policy carried by every tree node.
///
/// Files use `Ignore`/`Copy`/`CopyNew`/`Archive`/`IniOverwrite`/`IniAdd`;
/// folders use `MergeFolder`/`ReplaceFolder`/`NewFolder`. `None` is the
/// unresolved default and must never reach the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Processor {
    /// Unresolved; assigned during asset resolution.
    #[default]
    None,
    /// No action.
    Ignore,
    /// Copy to the output, replacing any existing file.
    Copy,
    /// Copy only when no file of this name exists yet.
    CopyNew,
    /// The file is an archive and is extracted before use.
    Archive,
    /// INI file merged by overwriting existing values.
    IniOverwrite,
    /// INI file merged by only adding missing values.
    IniAdd,
    /// Folder merged into the existing one.
    MergeFolder,
    /// Folder replacing the existing one.
    ReplaceFolder,
    /// Folder applied only when none of this name exists.
    NewFolder,
}

/// Persisted description of a mod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModData {
    /// Name of the mod.
    pub name: String,
    /// Details about this mod: purpose, how to use, etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Canonical URI for metadata about this mod; the dependency-graph key.
    /// A mod loaded from anywhere else is reloaded from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Url>,
    /// Version history, newest last. Always non-empty; names are unique.
    pub versions: Vec<ModVersion>,
}

impl ModData {
    /// Check the descriptor invariants that decoding alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(Error::invalid(format!(
                "mod '{}' declares no versions",
                self.name
            )));
        }
        for (i, version) in self.versions.iter().enumerate() {
            if self.versions[..i]
                .iter()
                .any(|v| v.name.eq_ignore_ascii_case(&version.name))
            {
                return Err(Error::invalid(format!(
                    "mod '{}' declares version '{}' more than once",
                    self.name, version.name
                )));
            }
        }
        Ok(())
    }
}

/// One released version of a mod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModVersion {
    /// Identifier, unique among the mod's versions.
    #[serde(default)]
    pub name: String,
    /// Description / changelog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Compatibility with the predecessor: `Some(true)` fully compatible,
    /// `None` mostly compatible (deprecated API removed), `Some(false)`
    /// incompatible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compatible: Option<bool>,
    /// Explicit predecessor; defaults to the previous list entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeds: Option<String>,
    /// Assets making up this version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<ModAsset>,
    /// Mods required to install this version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ModDependency>,
}

/// One declared asset of a mod version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModAsset {
    /// Target location; empty means "merge children into the current root".
    #[serde(default)]
    pub path: String,
    /// URI the content is obtained from.
    pub origin: Url,
    /// What to do with the asset before and while merging.
    #[serde(default)]
    pub processor: Processor,
    /// Treat this path inside the archive as its root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
}

impl ModAsset {
    /// Does the origin point into the mod's own bundled archive?
    pub fn is_self_reference(&self) -> bool {
        self.origin.scheme().eq_ignore_ascii_case(SELF_REFERENCE_SCHEME)
            && self
                .origin
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(SELF_REFERENCE_HOST))
    }
}

/// A mod required by a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModDependency {
    /// Origin of the required mod.
    pub origin: Url,
    /// Required version, when the behaviour needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub version_behaviour: VersionBehaviour,
}

/// How a dependency constrains the required mod's version.
///
/// Carried through from the descriptor format; resolution currently always
/// targets the latest declared version regardless of this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersionBehaviour {
    /// No requirement.
    #[default]
    Any,
    /// Latest successor version.
    Latest,
    /// Latest successor that is not incompatible.
    Minimum,
    /// Latest successor that is compatible.
    Compatible,
    /// Exactly the named version.
    Exact,
}

/// Runtime state of a mod within one installation.
#[derive(Debug, Clone)]
pub struct Mod {
    pub data: ModData,
    /// The mod's own extracted archive, when it was loaded from a bundle;
    /// the target of self-referencing assets.
    pub bundled: Option<FileTree>,
    pub installed: bool,
    pub installed_version: Option<String>,
    /// Requested directly by the user rather than pulled in as a dependency.
    pub user_installed: bool,
    /// Version chosen by the current resolution run.
    pub target_version: Option<String>,
    /// Per-mod overlay built from the target version's assets.
    pub target_files: Option<FileTree>,
}

impl Mod {
    pub fn new(data: ModData) -> Self {
        Mod {
            data,
            bundled: None,
            installed: false,
            installed_version: None,
            user_installed: false,
            target_version: None,
            target_files: None,
        }
    }

    pub fn origin(&self) -> Option<&Url> {
        self.data.origin.as_ref()
    }
}
