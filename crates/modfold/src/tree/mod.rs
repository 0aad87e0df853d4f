//! In-memory virtual file tree.
//!
//! The tree is the working representation for everything the installer
//! assembles: extracted archives, per-mod overlays, and the final
//! installation image. Nodes live in an arena owned by the [`FileTree`] and
//! are addressed through copyable [`NodeId`] handles; `parent` is a plain
//! back-handle, so ownership flows strictly parent to children.
//!
//! Sibling names are unique case-insensitively and keep their insertion
//! order. No filesystem I/O happens here except through
//! [`FileData::read`]/[`FileData::apply`].

mod data;

pub use data::FileData;

use crate::error::{Error, Result};
use crate::model::Processor;

/// Stable handle into a [`FileTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    processor: Processor,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    File(FileData),
    Folder(Vec<NodeId>),
}

/// A detached subtree, used to move content within and across trees.
///
/// Produced by [`FileTree::export_items`] and consumed by
/// [`FileTree::add_items`]; each item carries its merge-policy tag along.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeItem {
    File {
        name: String,
        processor: Processor,
        data: FileData,
    },
    Folder {
        name: String,
        processor: Processor,
        children: Vec<TreeItem>,
    },
}

/// Hierarchical content model with deferred materialization.
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: Vec<Node>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// Create a tree holding only an empty root folder.
    pub fn new() -> Self {
        FileTree {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                processor: Processor::None,
                kind: NodeKind::Folder(Vec::new()),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn processor(&self, id: NodeId) -> Processor {
        self.nodes[id.0].processor
    }

    pub fn set_processor(&mut self, id: NodeId, processor: Processor) {
        self.nodes[id.0].processor = processor;
    }

    pub fn is_file(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::File(_))
    }

    pub fn is_folder(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Folder(_))
    }

    /// The file's content source, or `None` for folders.
    pub fn file_data(&self, id: NodeId) -> Option<&FileData> {
        match &self.nodes[id.0].kind {
            NodeKind::File(data) => Some(data),
            NodeKind::Folder(_) => None,
        }
    }

    /// Read a file node's content; InvalidState for folders.
    pub fn read_file(&self, id: NodeId) -> Result<Vec<u8>> {
        match self.file_data(id) {
            Some(data) => data.read(),
            None => Err(Error::invalid(format!(
                "'{}' is a folder, not a file",
                self.full_path(id)
            ))),
        }
    }

    /// Child handles in insertion order; empty for files.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Folder(children) => children,
            NodeKind::File(_) => &[],
        }
    }

    /// `/`-joined path from the root, for display and errors.
    pub fn full_path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !self.nodes[node.0].name.is_empty() {
                parts.push(self.nodes[node.0].name.as_str());
            }
            current = self.nodes[node.0].parent;
        }
        if parts.is_empty() {
            return "/".to_owned();
        }
        parts.reverse();
        parts.join("/")
    }

    fn find_child(&self, folder: NodeId, name: &str) -> Option<NodeId> {
        self.children(folder)
            .iter()
            .copied()
            .find(|&c| self.nodes[c.0].name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup; `"."` is the folder itself, `".."` its
    /// parent.
    pub fn get(&self, folder: NodeId, name: &str) -> Option<NodeId> {
        match name {
            "." => Some(folder),
            ".." => self.parent(folder),
            _ => self.find_child(folder, name),
        }
    }

    /// Like [`get`](Self::get), but a non-file match yields `None`.
    pub fn get_file(&self, folder: NodeId, name: &str) -> Option<NodeId> {
        self.get(folder, name).filter(|&id| self.is_file(id))
    }

    /// Like [`get`](Self::get), but a non-folder match yields `None`.
    pub fn get_folder(&self, folder: NodeId, name: &str) -> Option<NodeId> {
        self.get(folder, name).filter(|&id| self.is_folder(id))
    }

    /// Return the named child folder, creating it when absent.
    pub fn get_or_add_folder(&mut self, folder: NodeId, name: &str) -> Result<NodeId> {
        match name {
            "." => return Ok(folder),
            ".." => {
                return self
                    .parent(folder)
                    .ok_or_else(|| Error::invalid("cannot step above the tree root"));
            }
            "" => return Err(Error::invalid("folder name must not be empty")),
            _ => {}
        }
        if let Some(existing) = self.find_child(folder, name) {
            return if self.is_folder(existing) {
                Ok(existing)
            } else {
                Err(Error::invalid(format!(
                    "a file named '{name}' already occupies this slot"
                )))
            };
        }
        Ok(self.insert(folder, name, NodeKind::Folder(Vec::new())))
    }

    /// Add a new file; Collision when any entry already claims the name.
    pub fn add_file(&mut self, folder: NodeId, name: &str, data: FileData) -> Result<NodeId> {
        if name.is_empty() {
            return Err(Error::invalid("file name must not be empty"));
        }
        if self.find_child(folder, name).is_some() {
            return Err(Error::Collision(name.to_owned()));
        }
        Ok(self.insert(folder, name, NodeKind::File(data)))
    }

    /// Create or unconditionally overwrite the named file.
    ///
    /// The replaced node keeps its handle but adopts the incoming name
    /// spelling and starts with an unresolved processor. Collision when a
    /// folder claims the name.
    pub fn replace_file(&mut self, folder: NodeId, name: &str, data: FileData) -> Result<NodeId> {
        if name.is_empty() {
            return Err(Error::invalid("file name must not be empty"));
        }
        if let Some(existing) = self.find_child(folder, name) {
            if self.is_folder(existing) {
                return Err(Error::Collision(name.to_owned()));
            }
            let node = &mut self.nodes[existing.0];
            node.name = name.to_owned();
            node.kind = NodeKind::File(data);
            node.processor = Processor::None;
            return Ok(existing);
        }
        Ok(self.insert(folder, name, NodeKind::File(data)))
    }

    /// Walk/create folders along a `/`-delimited path, then add the terminal
    /// file. Empty segments are skipped; a path with no segments is
    /// InvalidState.
    pub fn path_add_file(&mut self, folder: NodeId, path: &str, data: FileData) -> Result<NodeId> {
        let mut segments: Vec<&str> = split_path(path).collect();
        let Some(name) = segments.pop() else {
            return Err(Error::invalid("empty path"));
        };
        let mut current = folder;
        for segment in segments {
            current = self.get_or_add_folder(current, segment)?;
        }
        self.add_file(current, name, data)
    }

    /// Walk/create folders along a `/`-delimited path and return the final
    /// one. A path with no segments is the starting folder itself.
    pub fn path_add_folder(&mut self, folder: NodeId, path: &str) -> Result<NodeId> {
        let mut current = folder;
        for segment in split_path(path) {
            current = self.get_or_add_folder(current, segment)?;
        }
        Ok(current)
    }

    /// Resolve a `/`-delimited path.
    ///
    /// `Ok(None)` when any segment is merely absent; InvalidState when a
    /// segment tries to index into a file.
    pub fn get_path(&self, folder: NodeId, path: &str) -> Result<Option<NodeId>> {
        let mut current = folder;
        for segment in split_path(path) {
            if self.is_file(current) {
                return Err(Error::invalid(format!(
                    "'{}' is a file, not a folder",
                    self.full_path(current)
                )));
            }
            match self.get(current, segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Detach a copy of a node (and its subtree) from the arena.
    pub fn export_item(&self, id: NodeId) -> TreeItem {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::File(data) => TreeItem::File {
                name: node.name.clone(),
                processor: node.processor,
                data: data.clone(),
            },
            NodeKind::Folder(_) => TreeItem::Folder {
                name: node.name.clone(),
                processor: node.processor,
                children: self.export_items(id),
            },
        }
    }

    /// Detached copies of a folder's children, in order.
    pub fn export_items(&self, folder: NodeId) -> Vec<TreeItem> {
        self.children(folder)
            .iter()
            .map(|&c| self.export_item(c))
            .collect()
    }

    /// Recursively import detached items, preserving their processor tags.
    ///
    /// Folders merge structurally into existing same-named folders (no merge
    /// *policy* is applied here); a file landing on an occupied name is a
    /// Collision.
    pub fn add_items(&mut self, folder: NodeId, items: &[TreeItem]) -> Result<()> {
        for item in items {
            match item {
                TreeItem::Folder {
                    name,
                    processor,
                    children,
                } => {
                    let target = self.get_or_add_folder(folder, name)?;
                    self.set_processor(target, *processor);
                    self.add_items(target, children)?;
                }
                TreeItem::File {
                    name,
                    processor,
                    data,
                } => {
                    let target = self.add_file(folder, name, data.clone())?;
                    self.set_processor(target, *processor);
                }
            }
        }
        Ok(())
    }

    /// Unlink a child from its folder. The node stays allocated but
    /// unreachable.
    pub fn remove_child(&mut self, folder: NodeId, child: NodeId) {
        if let NodeKind::Folder(children) = &mut self.nodes[folder.0].kind {
            children.retain(|&c| c != child);
        }
        self.nodes[child.0].parent = None;
    }

    /// Unlink all children of a folder.
    pub fn clear_children(&mut self, folder: NodeId) {
        let orphans = match &mut self.nodes[folder.0].kind {
            NodeKind::Folder(children) => std::mem::take(children),
            NodeKind::File(_) => Vec::new(),
        };
        for orphan in orphans {
            self.nodes[orphan.0].parent = None;
        }
    }

    fn insert(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        debug_assert!(self.is_folder(parent));
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_owned(),
            parent: Some(parent),
            processor: Processor::None,
            kind,
        });
        if let NodeKind::Folder(children) = &mut self.nodes[parent.0].kind {
            children.push(id);
        }
        id
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
