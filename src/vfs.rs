//! In-memory filesystem assembled from backup manifests.
//!
//! Nodes live in an arena and reference each other by index, parents
//! included, so the tree needs no reference counting. Directories that
//! stand for a backup carry a one-shot loader with the manifest key; the
//! shell materializes the manifest on first access.

use std::collections::BTreeMap;

use anyhow::{bail, Error};

use crate::chunk::Chunk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(usize);

enum Loader {
    None,
    Unloaded(String),
    Loaded,
}

enum NodeKind {
    Directory { children: BTreeMap<String, NodeId>, loader: Loader },
    File { chunks: Vec<Chunk> },
}

struct Node {
    name: String,
    parent: Option<NodeId>,
    kind: NodeKind,
}

pub struct Vfs {
    nodes: Vec<Node>,
}

impl Vfs {
    pub fn new() -> Self {
        Vfs {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                    loader: Loader::None,
                },
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn is_dir(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Directory { .. })
    }

    /// The chunk list of a file node, `None` for directories.
    pub fn chunks(&self, id: NodeId) -> Option<&[Chunk]> {
        match &self.node(id).kind {
            NodeKind::File { chunks } => Some(chunks),
            NodeKind::Directory { .. } => None,
        }
    }

    /// Child lookup resolving the synthetic `.` and `..` entries; `..` of
    /// the root is the root itself.
    pub fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match name {
            "." => Some(dir),
            ".." => Some(self.node(dir).parent.unwrap_or(dir)),
            _ => self.child_raw(dir, name),
        }
    }

    fn child_raw(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match &self.node(dir).kind {
            NodeKind::Directory { children, .. } => children.get(name).copied(),
            NodeKind::File { .. } => None,
        }
    }

    /// Real children in name order.
    pub fn children(&self, dir: NodeId) -> Vec<(String, NodeId)> {
        match &self.node(dir).kind {
            NodeKind::Directory { children, .. } => {
                children.iter().map(|(name, id)| (name.clone(), *id)).collect()
            }
            NodeKind::File { .. } => Vec::new(),
        }
    }

    pub fn set_loader(&mut self, id: NodeId, manifest_key: String) {
        if let NodeKind::Directory { loader, .. } = &mut self.node_mut(id).kind {
            *loader = Loader::Unloaded(manifest_key);
        }
    }

    /// Take the pending loader key, marking the directory loaded. Returns
    /// `Some` exactly once per tagged directory.
    pub fn take_loader(&mut self, id: NodeId) -> Option<String> {
        if let NodeKind::Directory { loader, .. } = &mut self.node_mut(id).kind {
            match std::mem::replace(loader, Loader::Loaded) {
                Loader::Unloaded(key) => return Some(key),
                Loader::None => *loader = Loader::None,
                Loader::Loaded => {}
            }
        }
        None
    }

    fn alloc(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_owned(),
            parent: Some(parent),
            kind,
        });
        if let NodeKind::Directory { children, .. } = &mut self.node_mut(parent).kind {
            children.insert(name.to_owned(), id);
        }
        id
    }

    fn subdir(&mut self, dir: NodeId, name: &str) -> Result<NodeId, Error> {
        if let Some(existing) = self.child_raw(dir, name) {
            if !self.is_dir(existing) {
                bail!("'{}' already exists as a file", name);
            }
            return Ok(existing);
        }
        Ok(self.alloc(
            dir,
            name,
            NodeKind::Directory {
                children: BTreeMap::new(),
                loader: Loader::None,
            },
        ))
    }

    /// Insert `path` below `at` and return the terminal node.
    ///
    /// The path must start with `/`. A trailing slash on a single-component
    /// path names a directory; any other terminal component names a file.
    /// Repeated insertion is idempotent and returns the existing node.
    pub fn insert_path(&mut self, at: NodeId, path: &str) -> Result<NodeId, Error> {
        let rest = match path.strip_prefix('/') {
            Some(rest) => rest,
            None => bail!("path does not start with '/': {}", path),
        };

        if rest.matches('/').count() == 1 && rest.ends_with('/') {
            return self.subdir(at, rest.trim_end_matches('/'));
        }

        match rest.split_once('/') {
            Some((first, remainder)) => {
                let sub = self.subdir(at, first)?;
                self.insert_path(sub, &format!("/{}", remainder))
            }
            None => match self.child_raw(at, rest) {
                Some(existing) => Ok(existing),
                None => Ok(self.alloc(at, rest, NodeKind::File { chunks: Vec::new() })),
            },
        }
    }

    /// Insert one manifest record, appending the descriptor to its file
    /// node's chunk list.
    pub fn insert_record(&mut self, at: NodeId, chunk: Chunk) -> Result<(), Error> {
        let id = self.insert_path(at, &chunk.path)?;
        match &mut self.node_mut(id).kind {
            NodeKind::File { chunks } => {
                chunks.push(chunk);
                Ok(())
            }
            NodeKind::Directory { .. } => bail!("manifest path {} resolves to a directory", chunk.path),
        }
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
