//! Installation driver: dependency resolution, overlay folding, disk commit.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::merge;
use crate::metadata;
use crate::model::Mod;
use crate::services::Services;
use crate::tree::{FileData, FileTree, NodeId};

/// Existing configuration files consulted before the fold, so merge policies
/// can account for prior installation state.
const SEED_FILES: &[&str] = &["doorstop_config.ini"];

/// Where an installation run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Requested,
    Resolving,
    Downloading,
    Merging,
    Applying,
    Done,
    Failed,
}

/// One target installation directory and the mods applied to it.
///
/// The pipeline is synchronous and single-writer: resolution, per-mod asset
/// realization, and the fold all run sequentially, and the folded tree is
/// fully assembled in memory before the first disk write.
pub struct Installation {
    path: PathBuf,
    services: Services,
    mods: Vec<Mod>,
    index: HashMap<Url, usize>,
    seed_files: Vec<String>,
    state: InstallState,
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("path", &self.path)
            .field("mods", &self.mods.len())
            .field("seed_files", &self.seed_files)
            .field("state", &self.state)
            .finish()
    }
}

impl Installation {
    /// Open an existing installation directory.
    pub fn open(path: impl Into<PathBuf>, services: Services) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(Error::invalid(format!(
                "installation path '{}' is not a directory",
                path.display()
            )));
        }
        Ok(Installation {
            path,
            services,
            mods: Vec::new(),
            index: HashMap::new(),
            seed_files: SEED_FILES.iter().map(|s| (*s).to_owned()).collect(),
            state: InstallState::Requested,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Mods known to this installation, requested ones first.
    pub fn mods(&self) -> impl Iterator<Item = &Mod> {
        self.mods.iter()
    }

    /// Consult another existing file during the fold.
    pub fn track_seed_file(&mut self, name: impl Into<String>) {
        self.seed_files.push(name.into());
    }

    /// Fetch the mod behind `uri` and mark it requested.
    pub fn install(&mut self, uri: &Url) -> Result<()> {
        let entry = metadata::fetch_mod(&self.services, uri)?;
        self.install_mod(entry)
    }

    /// Mark a mod as requested by the user, deduplicating by canonical
    /// origin.
    pub fn install_mod(&mut self, entry: Mod) -> Result<()> {
        let index = self.add_entry(entry)?;
        self.mods[index].user_installed = true;
        info!(name = %self.mods[index].data.name, "mod requested");
        Ok(())
    }

    /// Resolve, materialize, fold, and commit everything requested so far.
    ///
    /// Files on disk that the folded tree does not mention are left
    /// untouched; nothing is ever pruned. Any failure flips the run to
    /// [`InstallState::Failed`]; failures before the applying stage never
    /// touch the filesystem.
    pub fn apply(&mut self) -> Result<()> {
        match self.apply_inner() {
            Ok(()) => {
                self.transition(InstallState::Done);
                Ok(())
            }
            Err(err) => {
                self.transition(InstallState::Failed);
                Err(err)
            }
        }
    }

    fn apply_inner(&mut self) -> Result<()> {
        self.transition(InstallState::Resolving);
        let closure = self.collect_dependencies()?;

        self.transition(InstallState::Downloading);
        self.download_mods(&closure)?;

        self.transition(InstallState::Merging);
        let mut target = self.current_files()?;
        let target_root = target.root();
        // dependencies fold first, directly requested mods last, so a
        // requested mod always wins conflicts against anything it pulled in
        for &index in closure.iter().rev() {
            if let Some(files) = &self.mods[index].target_files {
                debug!(name = %self.mods[index].data.name, "folding overlay");
                merge::merge_into(
                    &mut target,
                    target_root,
                    files,
                    files.root(),
                    self.services.ini.as_ref(),
                )?;
            }
        }

        self.transition(InstallState::Applying);
        apply_installation(&target, target_root, &self.path)?;
        Ok(())
    }

    fn transition(&mut self, state: InstallState) {
        info!(state = ?state, "installation state");
        self.state = state;
    }

    /// Breadth-first closure over the requested mods' dependencies.
    ///
    /// Each distinct canonical origin is resolved at most once and the
    /// result keeps insertion order: requested mods first, dependencies in
    /// discovery order after. Any descriptor fetch failure aborts the run.
    fn collect_dependencies(&mut self) -> Result<Vec<usize>> {
        let mut closure: Vec<usize> = (0..self.mods.len())
            .filter(|&i| self.mods[i].user_installed)
            .collect();
        let mut seen: HashSet<Url> = closure
            .iter()
            .filter_map(|&i| self.mods[i].data.origin.clone())
            .collect();

        let mut cursor = 0;
        while cursor < closure.len() {
            let index = closure[cursor];
            cursor += 1;

            // the resolution target is simply the latest declared version
            let version = self.mods[index]
                .data
                .versions
                .last()
                .cloned()
                .ok_or_else(|| {
                    Error::invalid(format!(
                        "mod '{}' declares no versions",
                        self.mods[index].data.name
                    ))
                })?;
            self.mods[index].target_version = Some(version.name.clone());
            debug!(
                name = %self.mods[index].data.name,
                version = %version.name,
                dependencies = version.dependencies.len(),
                "resolved target version"
            );

            for dependency in &version.dependencies {
                if seen.contains(&dependency.origin) {
                    continue;
                }
                let dep_index = match self.index.get(&dependency.origin) {
                    Some(&i) => i,
                    None => {
                        info!(origin = %dependency.origin, "resolving dependency");
                        let entry = metadata::fetch_mod(&self.services, &dependency.origin)?;
                        self.add_entry(entry)?
                    }
                };
                seen.insert(dependency.origin.clone());
                if let Some(canonical) = self.mods[dep_index].data.origin.clone() {
                    if canonical != dependency.origin && !seen.insert(canonical) {
                        continue;
                    }
                }
                closure.push(dep_index);
            }
        }
        Ok(closure)
    }

    /// Build each closure entry's overlay from its target version's assets.
    fn download_mods(&mut self, closure: &[usize]) -> Result<()> {
        for &index in closure {
            let target = self.mods[index]
                .target_version
                .clone()
                .ok_or_else(|| Error::invalid("closure entry without a resolved version"))?;
            let version = self.mods[index]
                .data
                .versions
                .iter()
                .find(|v| v.name == target)
                .cloned()
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "version '{}' of mod '{}'",
                        target, self.mods[index].data.name
                    ))
                })?;
            if version.assets.is_empty() {
                self.mods[index].target_files = None;
                continue;
            }

            info!(
                name = %self.mods[index].data.name,
                version = %version.name,
                assets = version.assets.len(),
                "materializing assets"
            );
            let mut tree = FileTree::new();
            let root = tree.root();
            for asset in &version.assets {
                merge::load_asset(
                    &mut tree,
                    root,
                    asset,
                    self.mods[index].bundled.as_ref(),
                    &self.services,
                )?;
            }
            merge::resolve_processors(&mut tree)?;
            self.mods[index].target_files = Some(tree);
        }
        Ok(())
    }

    /// The subset of on-disk state the fold should see: tracked configuration
    /// files that already exist, lazily referenced.
    fn current_files(&self) -> Result<FileTree> {
        let mut tree = FileTree::new();
        let root = tree.root();
        for name in &self.seed_files {
            let on_disk = self.path.join(name);
            if !on_disk.is_file() || tree.get(root, name).is_some() {
                continue;
            }
            debug!(file = %on_disk.display(), "seeding fold with existing file");
            tree.add_file(root, name, FileData::from_path(&on_disk))?;
        }
        Ok(tree)
    }

    fn add_entry(&mut self, entry: Mod) -> Result<usize> {
        let origin = entry.data.origin.clone().ok_or_else(|| {
            Error::invalid(format!("mod '{}' has no canonical origin", entry.data.name))
        })?;
        if let Some(&existing) = self.index.get(&origin) {
            return Ok(existing);
        }
        self.index.insert(origin, self.mods.len());
        self.mods.push(entry);
        Ok(self.mods.len() - 1)
    }
}

/// Commit the folded tree depth-first: files apply their content, folders are
/// created and recursed into.
fn apply_installation(tree: &FileTree, folder: NodeId, path: &Path) -> Result<()> {
    for &child in tree.children(folder) {
        let dest = path.join(tree.name(child));
        if let Some(data) = tree.file_data(child) {
            debug!(file = %dest.display(), "writing file");
            data.apply(&dest)?;
        } else {
            fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
            apply_installation(tree, child, &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Processor;
    use crate::tests::support::services;

    #[test]
    fn open_requires_an_existing_directory() {
        let (services, _fetch) = services(vec![]);
        let err = Installation::open("/definitely/not/here", services).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn current_files_seeds_only_present_configs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doorstop_config.ini"), "[s]\nk=1\n").unwrap();

        let (services, _fetch) = services(vec![]);
        let install = Installation::open(dir.path(), services).unwrap();
        let seeded = install.current_files().unwrap();
        let root = seeded.root();
        assert!(seeded.get_file(root, "doorstop_config.ini").is_some());

        let empty = tempfile::tempdir().unwrap();
        let (services, _fetch) = crate::tests::support::services(vec![]);
        let install = Installation::open(empty.path(), services).unwrap();
        let seeded = install.current_files().unwrap();
        assert!(seeded.children(seeded.root()).is_empty());
    }

    #[test]
    fn apply_installation_writes_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = FileTree::new();
        let root = tree.root();
        let file = tree
            .path_add_file(root, "Mods/Example/lib.dll", FileData::from_bytes(b"bin".to_vec()))
            .unwrap();
        tree.set_processor(file, Processor::Copy);

        apply_installation(&tree, root, dir.path()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("Mods/Example/lib.dll")).unwrap(),
            b"bin"
        );
    }
}
