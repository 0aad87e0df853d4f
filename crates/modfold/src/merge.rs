//! Merge policy engine.
//!
//! Turns declared assets into a per-mod target tree ([`load_asset`]), assigns
//! default policies to bundle content ([`load_bundle`]), and folds one tree
//! into another under the per-entry policies ([`merge_into`]). Policy
//! resolution is finished off by an explicit normalization pass
//! ([`resolve_processors`]) so that nothing unresolved ever reaches the fold.

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{BUNDLE_DESCRIPTOR, BUNDLE_MANIFEST, ModAsset, Processor};
use crate::services::{IniMergeOptions, IniMerger, Services};
use crate::tree::{FileData, FileTree, NodeId, TreeItem};

/// Content an asset resolved to, detached from any tree.
enum Resolved {
    File(FileData),
    Items(Vec<TreeItem>),
}

/// Resolve one declared asset into the target tree.
///
/// Obtains the content (from the mod's own bundle for self-references, via
/// the fetch chain otherwise), extracts it when the asset is tagged
/// `Archive`, relocates it under `asset.path` (or merges a folder's children
/// into `root` when the path is empty), tags the placed node, and defaults
/// still-untagged scaffolding ancestors to `MergeFolder`.
pub fn load_asset(
    tree: &mut FileTree,
    root: NodeId,
    asset: &ModAsset,
    bundled: Option<&FileTree>,
    services: &Services,
) -> Result<()> {
    debug!(origin = %asset.origin, path = %asset.path, processor = ?asset.processor, "loading asset");

    let mut resolved = if asset.is_self_reference() {
        let bundle = bundled.ok_or_else(|| {
            Error::invalid("asset references the bundled archive, but this mod has no bundle")
        })?;
        let inner = asset.origin.path().trim_start_matches('/');
        let node = bundle
            .get_path(bundle.root(), inner)?
            .ok_or_else(|| Error::not_found(format!("bundled entry '{}'", asset.origin)))?;
        match bundle.file_data(node) {
            Some(data) => Resolved::File(data.clone()),
            None => Resolved::Items(payload_items(bundle, node)),
        }
    } else {
        Resolved::File(FileData::from_bytes(services.fetch.fetch(&asset.origin)?))
    };

    if asset.processor == Processor::Archive {
        resolved = match resolved {
            Resolved::File(data) => {
                resolve_archive(&data, asset.archive_path.as_deref(), services)?
            }
            other => other,
        };
    }

    let placed = if !asset.path.is_empty() {
        match &resolved {
            Resolved::Items(items) => {
                let target = tree.path_add_folder(root, &asset.path)?;
                tree.add_items(target, items)?;
                Some(target)
            }
            Resolved::File(data) => Some(tree.path_add_file(root, &asset.path, data.clone())?),
        }
    } else {
        match &resolved {
            Resolved::Items(items) => {
                tree.add_items(root, items)?;
                None
            }
            Resolved::File(_) => {
                return Err(Error::invalid(format!(
                    "file asset '{}' must name a target path",
                    asset.origin
                )));
            }
        }
    };

    if let Some(node) = placed {
        if asset.processor != Processor::Archive && asset.processor != Processor::None {
            tree.set_processor(node, asset.processor);
        }
        if tree.processor(node) == Processor::None {
            let fallback = if tree.is_file(node) {
                Processor::Copy
            } else {
                Processor::MergeFolder
            };
            tree.set_processor(node, fallback);
        }
        if let Some(parent) = tree.parent(node) {
            tag_scaffolding(tree, parent);
        }
    }
    Ok(())
}

/// Assign merge policies to an archive read as a mod body.
///
/// Matches entries against an optional `meta.json` manifest at the archive
/// root, then defaults whatever is left: files to `Copy` (except the root
/// metadata files, which stay untagged) and folders to `MergeFolder`,
/// recursively.
pub fn load_bundle(tree: &mut FileTree, root: NodeId, services: &Services) -> Result<()> {
    let manifest: Vec<ModAsset> = match tree.get_file(root, BUNDLE_MANIFEST) {
        Some(meta) => serde_json::from_slice(&tree.read_file(meta)?)?,
        None => Vec::new(),
    };
    if !manifest.is_empty() {
        debug!(entries = manifest.len(), "applying bundle manifest");
    }
    apply_manifest(tree, root, root, &manifest, "/", services)?;
    apply_default_tags(tree, root, true);
    Ok(())
}

/// Fold `added` into `existing`, honoring each added node's policy.
///
/// `added` is never mutated, and repeating the same fold sequence reproduces
/// the same tree.
pub fn merge_into(
    existing: &mut FileTree,
    existing_root: NodeId,
    added: &FileTree,
    added_root: NodeId,
    ini: &dyn IniMerger,
) -> Result<()> {
    for &child in added.children(added_root) {
        let name = added.name(child);
        if added.is_folder(child) {
            match added.processor(child) {
                Processor::MergeFolder => {
                    let target = existing.get_or_add_folder(existing_root, name)?;
                    merge_into(existing, target, added, child, ini)?;
                }
                Processor::NewFolder => {
                    if existing.get_folder(existing_root, name).is_some() {
                        continue;
                    }
                    let target = existing.get_or_add_folder(existing_root, name)?;
                    existing.add_items(target, &added.export_items(child))?;
                }
                Processor::ReplaceFolder => {
                    let target = existing.get_or_add_folder(existing_root, name)?;
                    existing.clear_children(target);
                    existing.add_items(target, &added.export_items(child))?;
                }
                other => {
                    return Err(Error::invalid(format!(
                        "folder '{}' carries non-folder policy {other:?}",
                        added.full_path(child)
                    )));
                }
            }
        } else {
            let Some(data) = added.file_data(child).cloned() else {
                continue;
            };
            match added.processor(child) {
                Processor::Ignore => {}
                Processor::CopyNew => {
                    if existing.get_file(existing_root, name).is_none() {
                        existing.replace_file(existing_root, name, data)?;
                    }
                }
                Processor::Copy => {
                    existing.replace_file(existing_root, name, data)?;
                }
                policy @ (Processor::IniOverwrite | Processor::IniAdd) => {
                    match existing.get_file(existing_root, name) {
                        None => {
                            existing.replace_file(existing_root, name, data)?;
                        }
                        Some(old) => {
                            let current = String::from_utf8_lossy(&existing.read_file(old)?)
                                .into_owned();
                            let incoming =
                                String::from_utf8_lossy(&added.read_file(child)?).into_owned();
                            let options = if policy == Processor::IniAdd {
                                IniMergeOptions::ADD
                            } else {
                                IniMergeOptions::OVERWRITE_VALUES
                            };
                            let merged = ini.merge(&current, &incoming, options)?;
                            existing.replace_file(
                                existing_root,
                                name,
                                FileData::from_bytes(merged.into_bytes()),
                            )?;
                        }
                    }
                }
                other => {
                    return Err(Error::invalid(format!(
                        "file '{}' carries non-file policy {other:?}",
                        added.full_path(child)
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Normalization pass run once after a per-mod tree is fully built.
///
/// Still-untagged folders default to `MergeFolder`; a still-untagged file at
/// this point is a construction bug and fails fast.
pub fn resolve_processors(tree: &mut FileTree) -> Result<()> {
    resolve_folder(tree, tree.root())
}

fn resolve_folder(tree: &mut FileTree, folder: NodeId) -> Result<()> {
    let children = tree.children(folder).to_vec();
    for child in children {
        if tree.is_file(child) {
            if tree.processor(child) == Processor::None {
                return Err(Error::invalid(format!(
                    "file '{}' has no merge policy assigned",
                    tree.full_path(child)
                )));
            }
        } else {
            if tree.processor(child) == Processor::None {
                tree.set_processor(child, Processor::MergeFolder);
            }
            resolve_folder(tree, child)?;
        }
    }
    Ok(())
}

/// Extract an archive payload and run bundle tagging over the result.
fn resolve_archive(
    data: &FileData,
    archive_path: Option<&str>,
    services: &Services,
) -> Result<Resolved> {
    let bytes = data.read()?;
    let mut extracted = services.extract.read(&bytes, archive_path)?;
    let root = extracted.root;
    if extracted.tree.is_folder(root) {
        load_bundle(&mut extracted.tree, root, services)?;
        Ok(Resolved::Items(payload_items(&extracted.tree, root)))
    } else {
        Ok(Resolved::File(FileData::from_bytes(
            extracted.tree.read_file(root)?,
        )))
    }
}

/// Detached copies of a loaded folder's children, minus untagged files;
/// those are the bundle-root metadata entries, which are not payload.
fn payload_items(tree: &FileTree, folder: NodeId) -> Vec<TreeItem> {
    tree.children(folder)
        .iter()
        .copied()
        .filter(|&c| !(tree.is_file(c) && tree.processor(c) == Processor::None))
        .map(|c| tree.export_item(c))
        .collect()
}

/// Climb towards the root, tagging untagged ancestors as `MergeFolder`;
/// stops at the first ancestor that already has a policy.
fn tag_scaffolding(tree: &mut FileTree, from: NodeId) {
    let mut current = Some(from);
    while let Some(id) = current {
        if tree.processor(id) != Processor::None {
            break;
        }
        tree.set_processor(id, Processor::MergeFolder);
        current = tree.parent(id);
    }
}

fn apply_manifest(
    tree: &mut FileTree,
    bundle_root: NodeId,
    folder: NodeId,
    manifest: &[ModAsset],
    archive_path: &str,
    services: &Services,
) -> Result<()> {
    if manifest.is_empty() {
        return Ok(());
    }
    let children = tree.children(folder).to_vec();
    for child in children {
        // skip nodes an earlier manifest entry relocated away
        if tree.parent(child) != Some(folder) {
            continue;
        }
        let entry_path = format!(
            "{archive_path}{}{}",
            tree.name(child),
            if tree.is_folder(child) { "/" } else { "" }
        );
        let mut keep = Some(child);
        if let Some(asset) = manifest
            .iter()
            .find(|a| a.origin.path().eq_ignore_ascii_case(&entry_path))
        {
            keep = apply_manifest_entry(tree, bundle_root, folder, child, asset, services)?;
        }
        if let Some(node) = keep {
            if tree.is_folder(node) {
                apply_manifest(tree, bundle_root, node, manifest, &entry_path, services)?;
            }
        }
    }
    Ok(())
}

/// Apply one matched manifest entry to a bundle node.
///
/// Returns the node when it stays in place (so matching can recurse into
/// it), `None` when it was extracted or relocated.
fn apply_manifest_entry(
    tree: &mut FileTree,
    bundle_root: NodeId,
    folder: NodeId,
    child: NodeId,
    asset: &ModAsset,
    services: &Services,
) -> Result<Option<NodeId>> {
    debug!(entry = %tree.full_path(child), origin = %asset.origin, "bundle manifest match");

    if asset.processor == Processor::Archive && tree.is_file(child) {
        let data = FileData::from_bytes(tree.read_file(child)?);
        let resolved = resolve_archive(&data, asset.archive_path.as_deref(), services)?;
        tree.remove_child(folder, child);
        match resolved {
            Resolved::Items(items) => {
                if asset.path.is_empty() {
                    tree.add_items(folder, &items)?;
                } else {
                    let (base, relative) = manifest_base(bundle_root, folder, &asset.path);
                    let target = tree.path_add_folder(base, relative)?;
                    tree.add_items(target, &items)?;
                }
            }
            Resolved::File(data) => {
                if asset.path.is_empty() {
                    return Err(Error::invalid(format!(
                        "archive entry '{}' resolved to a file and must name a target path",
                        asset.origin
                    )));
                }
                let (base, relative) = manifest_base(bundle_root, folder, &asset.path);
                tree.path_add_file(base, relative, data)?;
            }
        }
        return Ok(None);
    }

    if !asset.path.is_empty() {
        let (base, relative) = manifest_base(bundle_root, folder, &asset.path);
        if tree.is_folder(child) {
            let items = tree.export_items(child);
            tree.remove_child(folder, child);
            let target = tree.path_add_folder(base, relative)?;
            tree.add_items(target, &items)?;
            if asset.processor != Processor::None && asset.processor != Processor::Archive {
                tree.set_processor(target, asset.processor);
            }
        } else {
            let Some(data) = tree.file_data(child).cloned() else {
                return Ok(None);
            };
            tree.remove_child(folder, child);
            let node = tree.path_add_file(base, relative, data)?;
            if asset.processor != Processor::None && asset.processor != Processor::Archive {
                tree.set_processor(node, asset.processor);
            }
        }
        return Ok(None);
    }

    if asset.processor != Processor::None && asset.processor != Processor::Archive {
        tree.set_processor(child, asset.processor);
    }
    Ok(Some(child))
}

/// A manifest path starting with `/` is relative to the bundle root,
/// anything else to the folder the entry was found in.
fn manifest_base(bundle_root: NodeId, folder: NodeId, path: &str) -> (NodeId, &str) {
    match path.strip_prefix('/') {
        Some(rest) => (bundle_root, rest),
        None => (folder, path),
    }
}

/// Default whatever the manifest left untagged: files to `Copy`, folders to
/// `MergeFolder`, recursively. The metadata files at the archive root stay
/// untagged; they are installer input, not payload.
fn apply_default_tags(tree: &mut FileTree, folder: NodeId, at_root: bool) {
    let children = tree.children(folder).to_vec();
    for child in children {
        if tree.is_file(child) {
            if tree.processor(child) != Processor::None {
                continue;
            }
            let reserved = at_root && {
                let name = tree.name(child);
                name.eq_ignore_ascii_case(BUNDLE_MANIFEST)
                    || name.eq_ignore_ascii_case(BUNDLE_DESCRIPTOR)
            };
            if !reserved {
                tree.set_processor(child, Processor::Copy);
            }
        } else {
            if tree.processor(child) == Processor::None {
                tree.set_processor(child, Processor::MergeFolder);
            }
            apply_default_tags(tree, child, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{json_archive, services};

    fn bytes(text: &str) -> FileData {
        FileData::from_bytes(text.as_bytes().to_vec())
    }

    fn tagged_file(tree: &mut FileTree, path: &str, content: &str, processor: Processor) -> NodeId {
        let root = tree.root();
        let id = tree.path_add_file(root, path, bytes(content)).unwrap();
        tree.set_processor(id, processor);
        id
    }

    fn read(tree: &FileTree, path: &str) -> Vec<u8> {
        let node = tree.get_path(tree.root(), path).unwrap().unwrap();
        tree.read_file(node).unwrap()
    }

    mod fold {
        use super::*;
        use crate::services::StructuredIniMerger;

        fn fold(existing: &mut FileTree, added: &FileTree) {
            let eroot = existing.root();
            merge_into(existing, eroot, added, added.root(), &StructuredIniMerger).unwrap();
        }

        #[test]
        fn copy_always_replaces() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "a.txt", "old", Processor::None);
            let mut added = FileTree::new();
            tagged_file(&mut added, "a.txt", "new", Processor::Copy);

            fold(&mut existing, &added);
            assert_eq!(read(&existing, "a.txt"), b"new");
        }

        #[test]
        fn copy_new_keeps_existing_content() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "a.txt", "old", Processor::None);
            let mut added = FileTree::new();
            tagged_file(&mut added, "a.txt", "new", Processor::CopyNew);
            tagged_file(&mut added, "b.txt", "fresh", Processor::CopyNew);

            fold(&mut existing, &added);
            assert_eq!(read(&existing, "a.txt"), b"old");
            assert_eq!(read(&existing, "b.txt"), b"fresh");
        }

        #[test]
        fn ignore_is_a_noop() {
            let mut existing = FileTree::new();
            let mut added = FileTree::new();
            tagged_file(&mut added, "a.txt", "x", Processor::Ignore);

            fold(&mut existing, &added);
            assert!(existing.get_path(existing.root(), "a.txt").unwrap().is_none());
        }

        #[test]
        fn merge_folder_recurses() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "mods/keep.txt", "1", Processor::None);
            let mut added = FileTree::new();
            {
                let root = added.root();
                let folder = added.get_or_add_folder(root, "Mods").unwrap();
                added.set_processor(folder, Processor::MergeFolder);
            }
            tagged_file(&mut added, "Mods/new.txt", "2", Processor::Copy);

            fold(&mut existing, &added);
            let mods = existing.get_folder(existing.root(), "mods").unwrap();
            assert!(existing.get_file(mods, "keep.txt").is_some());
            assert!(existing.get_file(mods, "new.txt").is_some());
        }

        #[test]
        fn new_folder_only_applies_when_absent() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "cfg/keep.txt", "1", Processor::None);

            let mut added = FileTree::new();
            {
                let root = added.root();
                let cfg = added.get_or_add_folder(root, "cfg").unwrap();
                added.set_processor(cfg, Processor::NewFolder);
                let other = added.get_or_add_folder(root, "other").unwrap();
                added.set_processor(other, Processor::NewFolder);
            }
            tagged_file(&mut added, "cfg/drop.txt", "2", Processor::Copy);
            tagged_file(&mut added, "other/take.txt", "3", Processor::Copy);

            fold(&mut existing, &added);
            let cfg = existing.get_folder(existing.root(), "cfg").unwrap();
            assert!(existing.get_file(cfg, "keep.txt").is_some());
            assert!(existing.get_file(cfg, "drop.txt").is_none());
            assert_eq!(read(&existing, "other/take.txt"), b"3");
        }

        #[test]
        fn replace_folder_clears_previous_content() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "cfg/old.txt", "1", Processor::None);

            let mut added = FileTree::new();
            {
                let root = added.root();
                let cfg = added.get_or_add_folder(root, "cfg").unwrap();
                added.set_processor(cfg, Processor::ReplaceFolder);
            }
            tagged_file(&mut added, "cfg/new.txt", "2", Processor::Copy);

            fold(&mut existing, &added);
            let cfg = existing.get_folder(existing.root(), "cfg").unwrap();
            assert!(existing.get_file(cfg, "old.txt").is_none());
            assert!(existing.get_file(cfg, "new.txt").is_some());
        }

        #[test]
        fn ini_policies_merge_against_existing_file() {
            let mut existing = FileTree::new();
            tagged_file(&mut existing, "game.ini", "[s]\nk=1", Processor::None);

            let mut added = FileTree::new();
            tagged_file(&mut added, "game.ini", "[s]\nk=2\nj=3", Processor::IniAdd);
            fold(&mut existing, &added);
            assert_eq!(read(&existing, "game.ini"), b"[s]\nk=1\nj=3\n");

            let mut existing = FileTree::new();
            tagged_file(&mut existing, "game.ini", "[s]\nk=1", Processor::None);
            let mut added = FileTree::new();
            tagged_file(&mut added, "game.ini", "[s]\nk=2\nj=3", Processor::IniOverwrite);
            fold(&mut existing, &added);
            assert_eq!(read(&existing, "game.ini"), b"[s]\nk=2\nj=3\n");
        }

        #[test]
        fn ini_policy_without_existing_file_copies() {
            let mut existing = FileTree::new();
            let mut added = FileTree::new();
            tagged_file(&mut added, "game.ini", "[s]\nk=2", Processor::IniAdd);

            fold(&mut existing, &added);
            assert_eq!(read(&existing, "game.ini"), b"[s]\nk=2");
        }

        #[test]
        fn unresolved_policy_fails_fast() {
            let mut existing = FileTree::new();
            let mut added = FileTree::new();
            tagged_file(&mut added, "a.txt", "x", Processor::None);

            let eroot = existing.root();
            let err = merge_into(&mut existing, eroot, &added, added.root(), &StructuredIniMerger)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }

        #[test]
        fn repeating_a_fold_sequence_is_idempotent() {
            let mut overlay = FileTree::new();
            {
                let root = overlay.root();
                let cfg = overlay.get_or_add_folder(root, "cfg").unwrap();
                overlay.set_processor(cfg, Processor::ReplaceFolder);
            }
            tagged_file(&mut overlay, "cfg/a.txt", "1", Processor::Copy);
            tagged_file(&mut overlay, "b.txt", "2", Processor::CopyNew);
            tagged_file(&mut overlay, "game.ini", "[s]\nk=2\nj=3", Processor::IniAdd);

            let mut once = FileTree::new();
            tagged_file(&mut once, "game.ini", "[s]\nk=1", Processor::None);
            let mut twice = once.clone();

            fold(&mut once, &overlay);
            fold(&mut twice, &overlay);
            fold(&mut twice, &overlay);

            let oroot = once.root();
            let troot = twice.root();
            assert_eq!(once.export_items(oroot), twice.export_items(troot));
        }
    }

    mod assets {
        use super::*;

        #[test]
        fn fetched_file_lands_at_its_path_with_scaffolding_tagged() {
            let (services, _fetch) = services(vec![("test://lib.dll", b"binary".to_vec())]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "Mods/Example/lib.dll",
                "Origin": "test://lib.dll",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            load_asset(&mut tree, root, &asset, None, &services).unwrap();

            let file = tree.get_path(root, "Mods/Example/lib.dll").unwrap().unwrap();
            assert_eq!(tree.processor(file), Processor::Copy);
            let parent = tree.parent(file).unwrap();
            assert_eq!(tree.processor(parent), Processor::MergeFolder);
            let grandparent = tree.parent(parent).unwrap();
            assert_eq!(tree.processor(grandparent), Processor::MergeFolder);
        }

        #[test]
        fn explicit_processor_wins_over_default() {
            let (services, _fetch) = services(vec![("test://cfg.ini", b"[s]\nk=1".to_vec())]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "cfg.ini",
                "Origin": "test://cfg.ini",
                "Processor": "IniAdd",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            load_asset(&mut tree, root, &asset, None, &services).unwrap();
            let file = tree.get_path(root, "cfg.ini").unwrap().unwrap();
            assert_eq!(tree.processor(file), Processor::IniAdd);
        }

        #[test]
        fn missing_content_aborts_with_not_found() {
            let (services, _fetch) = services(vec![]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "a.txt",
                "Origin": "test://absent",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            let err = load_asset(&mut tree, root, &asset, None, &services).unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }

        #[test]
        fn file_asset_without_path_is_rejected() {
            let (services, _fetch) = services(vec![("test://a", b"x".to_vec())]);
            let asset: ModAsset =
                serde_json::from_value(serde_json::json!({"Origin": "test://a"})).unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            let err = load_asset(&mut tree, root, &asset, None, &services).unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }

        #[test]
        fn archive_asset_restricted_to_sub_root() {
            let pack = json_archive(&[("sub/readme.txt", "hi"), ("root.txt", "no")]);
            let (services, _fetch) = services(vec![("test://pack", pack)]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "docs",
                "Origin": "test://pack",
                "Processor": "Archive",
                "ArchivePath": "sub",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            load_asset(&mut tree, root, &asset, None, &services).unwrap();

            assert_eq!(read(&tree, "docs/readme.txt"), b"hi");
            assert!(tree.get_path(root, "root.txt").unwrap().is_none());
            assert!(tree.get_path(root, "docs/root.txt").unwrap().is_none());
            let docs = tree.get_path(root, "docs").unwrap().unwrap();
            assert_eq!(tree.processor(docs), Processor::MergeFolder);
        }

        #[test]
        fn archive_asset_with_empty_path_merges_into_root() {
            let pack = json_archive(&[("data/file.txt", "x")]);
            let (services, _fetch) = services(vec![("test://pack", pack)]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Origin": "test://pack",
                "Processor": "Archive",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            load_asset(&mut tree, root, &asset, None, &services).unwrap();
            resolve_processors(&mut tree).unwrap();

            let file = tree.get_path(root, "data/file.txt").unwrap().unwrap();
            assert_eq!(tree.processor(file), Processor::Copy);
        }

        #[test]
        fn self_reference_pulls_from_the_bundle() {
            let (services, _fetch) = services(vec![]);
            let mut bundle = FileTree::new();
            tagged_file(&mut bundle, "payload/file.txt", "x", Processor::Copy);

            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "Mods/X",
                "Origin": "dvmod://current-archive/payload",
                "Processor": "MergeFolder",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            load_asset(&mut tree, root, &asset, Some(&bundle), &services).unwrap();

            assert_eq!(read(&tree, "Mods/X/file.txt"), b"x");
            let target = tree.get_path(root, "Mods/X").unwrap().unwrap();
            assert_eq!(tree.processor(target), Processor::MergeFolder);
        }

        #[test]
        fn self_reference_without_bundle_is_invalid() {
            let (services, _fetch) = services(vec![]);
            let asset: ModAsset = serde_json::from_value(serde_json::json!({
                "Path": "x",
                "Origin": "dvmod://current-archive/payload",
            }))
            .unwrap();

            let mut tree = FileTree::new();
            let root = tree.root();
            let err = load_asset(&mut tree, root, &asset, None, &services).unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }
    }

    mod bundles {
        use super::*;

        #[test]
        fn untagged_payload_gets_defaults_and_metadata_stays_untagged() {
            let (services, _fetch) = services(vec![]);
            let archive = json_archive(&[
                ("meta.json", "[]"),
                ("dvmod.json", "{}"),
                ("readme.txt", "hello"),
                ("plugins/mod.dll", "bin"),
            ]);
            let extracted = services.extract.read(&archive, None).unwrap();
            let mut tree = extracted.tree;
            let root = extracted.root;
            load_bundle(&mut tree, root, &services).unwrap();

            let meta = tree.get_file(root, "meta.json").unwrap();
            assert_eq!(tree.processor(meta), Processor::None);
            let descriptor = tree.get_file(root, "dvmod.json").unwrap();
            assert_eq!(tree.processor(descriptor), Processor::None);
            let readme = tree.get_file(root, "readme.txt").unwrap();
            assert_eq!(tree.processor(readme), Processor::Copy);
            let plugins = tree.get_folder(root, "plugins").unwrap();
            assert_eq!(tree.processor(plugins), Processor::MergeFolder);
            let dll = tree.get_file(plugins, "mod.dll").unwrap();
            assert_eq!(tree.processor(dll), Processor::Copy);

            // metadata files are not payload
            let items = payload_items(&tree, root);
            assert_eq!(items.len(), 2);
        }

        #[test]
        fn nested_metadata_names_are_ordinary_payload() {
            let (services, _fetch) = services(vec![]);
            let archive = json_archive(&[("nested/meta.json", "{}")]);
            let extracted = services.extract.read(&archive, None).unwrap();
            let mut tree = extracted.tree;
            let root = extracted.root;
            load_bundle(&mut tree, root, &services).unwrap();

            let nested = tree.get_folder(root, "nested").unwrap();
            let meta = tree.get_file(nested, "meta.json").unwrap();
            assert_eq!(tree.processor(meta), Processor::Copy);
        }

        #[test]
        fn manifest_assigns_policies_by_archive_path() {
            let (services, _fetch) = services(vec![]);
            let manifest = r#"[
                {"Origin": "dvmod://current-archive/settings.ini", "Processor": "IniAdd"},
                {"Origin": "dvmod://current-archive/extras/", "Processor": "NewFolder"}
            ]"#;
            let archive = json_archive(&[
                ("meta.json", manifest),
                ("settings.ini", "[s]\nk=1"),
                ("extras/note.txt", "n"),
            ]);
            let extracted = services.extract.read(&archive, None).unwrap();
            let mut tree = extracted.tree;
            let root = extracted.root;
            load_bundle(&mut tree, root, &services).unwrap();

            let settings = tree.get_file(root, "settings.ini").unwrap();
            assert_eq!(tree.processor(settings), Processor::IniAdd);
            let extras = tree.get_folder(root, "extras").unwrap();
            assert_eq!(tree.processor(extras), Processor::NewFolder);
        }

        #[test]
        fn manifest_relocates_entries() {
            let (services, _fetch) = services(vec![]);
            let manifest = r#"[
                {"Origin": "dvmod://current-archive/loose.dll", "Path": "plugins/loose.dll"}
            ]"#;
            let archive = json_archive(&[("meta.json", manifest), ("loose.dll", "bin")]);
            let extracted = services.extract.read(&archive, None).unwrap();
            let mut tree = extracted.tree;
            let root = extracted.root;
            load_bundle(&mut tree, root, &services).unwrap();

            assert!(tree.get_file(root, "loose.dll").is_none());
            let relocated = tree.get_path(root, "plugins/loose.dll").unwrap().unwrap();
            assert_eq!(tree.processor(relocated), Processor::Copy);
            let plugins = tree.get_folder(root, "plugins").unwrap();
            assert_eq!(tree.processor(plugins), Processor::MergeFolder);
        }
    }

    #[test]
    fn normalization_defaults_folders_and_rejects_untagged_files() {
        let mut tree = FileTree::new();
        let root = tree.root();
        let folder = tree.get_or_add_folder(root, "scaffold").unwrap();
        let file = tree.path_add_file(folder, "deep/file.txt", bytes("x")).unwrap();
        tree.set_processor(file, Processor::Copy);

        resolve_processors(&mut tree).unwrap();
        assert_eq!(tree.processor(folder), Processor::MergeFolder);

        let mut tree = FileTree::new();
        let root = tree.root();
        tree.path_add_file(root, "untagged.txt", bytes("x")).unwrap();
        assert!(matches!(
            resolve_processors(&mut tree),
            Err(Error::InvalidState(_))
        ));
    }
}
