// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path-addressed node store
//!
//! The store owns two maps keyed by the same normalized path: node metadata
//! and file content. Every mutation that adds, moves or drops a path touches
//! both maps, so a content entry never outlives its node. Paths are taken
//! verbatim; no `..` handling or symlink following happens here.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::{DirEntry, HandleId, Node, NodeKind, NodeOrigin, PERMISSION_MASK};

/// Root path of every tree
pub const ROOT: &str = "/";

/// Parent of a normalized path (`"/"` is its own parent)
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(pos) => &path[..pos],
    }
}

/// Final component of a normalized path
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Join a directory path and a single component
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Whether `path` is `dir` itself or lies beneath it
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir == ROOT {
        return true;
    }
    path == dir || (path.starts_with(dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}

/// Replace everything from `offset` (clamped to the current length) with
/// `data`
pub(crate) fn splice(content: &mut Vec<u8>, data: &[u8], offset: u64) {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
    content.truncate(start);
    content.extend_from_slice(data);
}

pub(crate) fn read_range(content: &[u8], size: usize, offset: u64) -> Vec<u8> {
    let start = match usize::try_from(offset) {
        Ok(start) if start < content.len() => start,
        _ => return Vec::new(),
    };
    let end = start.saturating_add(size).min(content.len());
    content[start..end].to_vec()
}

/// In-memory metadata and content maps plus the handle counter
#[derive(Debug)]
pub struct NodeStore {
    nodes: HashMap<String, Node>,
    contents: HashMap<String, Vec<u8>>,
    next_handle: u64,
}

impl NodeStore {
    /// Create a store holding only the root directory
    pub fn new(root_mode: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Node::directory(root_mode));
        Self {
            nodes,
            contents: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn get(&self, path: &str) -> FsResult<&Node> {
        self.nodes.get(path).ok_or(FsError::NotFound)
    }

    fn get_mut(&mut self, path: &str) -> FsResult<&mut Node> {
        self.nodes.get_mut(path).ok_or(FsError::NotFound)
    }

    /// Hand out the next file handle. Handles are never reused.
    pub fn allocate_handle(&mut self) -> HandleId {
        let id = HandleId(self.next_handle);
        self.next_handle += 1;
        id
    }

    fn ensure_vacant(&self, path: &str) -> FsResult<()> {
        if self.nodes.contains_key(path) {
            Err(FsError::AlreadyExists)
        } else {
            Ok(())
        }
    }

    /// Insert an empty regular file. The parent is not checked.
    pub fn create(&mut self, path: &str, mode: u32) -> FsResult<HandleId> {
        self.ensure_vacant(path)?;
        self.nodes.insert(path.to_string(), Node::regular(mode));
        self.contents.insert(path.to_string(), Vec::new());
        Ok(self.allocate_handle())
    }

    /// Insert a directory. Root's link count goes up by one regardless of
    /// which directory is the parent.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> FsResult<()> {
        self.ensure_vacant(path)?;
        self.nodes.insert(path.to_string(), Node::directory(mode));
        self.get_mut(ROOT)?.link_count += 1;
        Ok(())
    }

    /// Insert a directory without touching root's link count (mount-time
    /// skeleton only)
    pub(crate) fn insert_directory(&mut self, path: &str, mode: u32) {
        self.nodes
            .entry(path.to_string())
            .or_insert_with(|| Node::directory(mode));
    }

    pub fn symlink(&mut self, link_path: &str, target: &str) -> FsResult<()> {
        self.ensure_vacant(link_path)?;
        self.nodes
            .insert(link_path.to_string(), Node::symlink(target.len() as u64));
        self.contents
            .insert(link_path.to_string(), target.as_bytes().to_vec());
        Ok(())
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        let node = self.get(path)?;
        if node.kind != NodeKind::Symlink {
            return Err(FsError::InvalidArgument);
        }
        let target = self.contents.get(path).map(Vec::as_slice).unwrap_or_default();
        Ok(String::from_utf8_lossy(target).into_owned())
    }

    fn has_children(&self, dir: &str) -> bool {
        self.nodes
            .keys()
            .any(|key| key != dir && parent_of(key) == dir)
    }

    fn drop_root_link(&mut self) {
        if let Some(root) = self.nodes.get_mut(ROOT) {
            root.link_count = root.link_count.saturating_sub(1).max(2);
        }
    }

    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        if path == ROOT {
            return Err(FsError::Busy);
        }
        let node = self.get(path)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.has_children(path) {
            return Err(FsError::NotEmpty);
        }
        let origin = node.origin;
        self.nodes.remove(path);
        if origin == NodeOrigin::Local {
            self.drop_root_link();
        }
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        if self.get(path)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.nodes.remove(path);
        self.contents.remove(path);
        Ok(())
    }

    /// Move `old` (and, for a directory, every path beneath it) to `new`.
    /// An existing `new` is replaced.
    pub fn rename(&mut self, old: &str, new: &str) -> FsResult<()> {
        if old == ROOT || new == ROOT {
            return Err(FsError::Busy);
        }
        let moving_dir = self.get(old)?.is_dir();
        if old == new {
            return Ok(());
        }
        if moving_dir && is_within(new, old) {
            return Err(FsError::InvalidArgument);
        }

        if let Ok(existing) = self.get(new) {
            match (moving_dir, existing.is_dir()) {
                (false, true) => return Err(FsError::IsADirectory),
                (true, false) => return Err(FsError::NotADirectory),
                (true, true) if self.has_children(new) => return Err(FsError::NotEmpty),
                _ => {}
            }
            let replaced_local_dir = existing.is_dir() && existing.origin == NodeOrigin::Local;
            self.nodes.remove(new);
            self.contents.remove(new);
            if replaced_local_dir {
                self.drop_root_link();
            }
        }

        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| is_within(key, old))
            .cloned()
            .collect();
        for key in moved {
            let target = format!("{new}{}", &key[old.len()..]);
            if let Some(node) = self.nodes.remove(&key) {
                self.nodes.insert(target.clone(), node);
            }
            if let Some(content) = self.contents.remove(&key) {
                self.contents.insert(target, content);
            }
        }
        debug!(target: "rtefs::store", %old, %new, "renamed");
        Ok(())
    }

    /// Clamp content to its first `length` bytes. Growing does not pad; the
    /// node still reports the requested length.
    pub fn truncate(&mut self, path: &str, length: u64) -> FsResult<()> {
        let node = self.get_mut(path)?;
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        node.size = length;
        node.times.modified = SystemTime::now();
        let content = self.contents.entry(path.to_string()).or_default();
        let keep = usize::try_from(length).unwrap_or(usize::MAX);
        content.truncate(keep);
        Ok(())
    }

    /// Replace everything from `offset` onwards with `data`. An offset past
    /// the end is clamped to the current length. A written passthrough
    /// snapshot becomes a local node.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        if self.get(path)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let content = self.contents.entry(path.to_string()).or_default();
        splice(content, data, offset);
        let size = content.len() as u64;

        let node = self.get_mut(path)?;
        node.size = size;
        node.times.modified = SystemTime::now();
        node.origin = NodeOrigin::Local;
        Ok(data.len())
    }

    /// Bytes `[offset, offset + size)` clipped to what is stored. Missing
    /// content reads as empty.
    pub fn read(&self, path: &str, size: usize, offset: u64) -> Vec<u8> {
        match self.contents.get(path) {
            Some(content) => read_range(content, size, offset),
            None => Vec::new(),
        }
    }

    /// Copy of the full content buffer for `path`
    pub fn snapshot(&self, path: &str) -> Vec<u8> {
        self.contents.get(path).cloned().unwrap_or_default()
    }

    /// Direct children of a directory, sorted by name
    pub fn children(&self, dir: &str) -> FsResult<Vec<DirEntry>> {
        if !self.get(dir)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let mut entries: Vec<DirEntry> = self
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != dir && parent_of(key) == dir)
            .map(|(key, node)| DirEntry {
                name: file_name(key).to_string(),
                kind: node.kind,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let node = self.get_mut(path)?;
        node.permissions = mode & PERMISSION_MASK;
        Ok(())
    }

    pub fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let node = self.get_mut(path)?;
        if uid.is_some() {
            node.owner = uid;
        }
        if gid.is_some() {
            node.group = gid;
        }
        Ok(())
    }

    /// Set access and modification times; `None` stamps both with now.
    pub fn utimens(&mut self, path: &str, times: Option<(SystemTime, SystemTime)>) -> FsResult<()> {
        let (accessed, modified) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        let node = self.get_mut(path)?;
        node.times.accessed = accessed;
        node.times.modified = modified;
        Ok(())
    }

    /// Missing attributes read as an empty value.
    pub fn xattr_get(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        Ok(self.get(path)?.xattrs.get(name).cloned().unwrap_or_default())
    }

    pub fn xattr_set(&mut self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.get_mut(path)?
            .xattrs
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    pub fn xattr_list(&self, path: &str) -> FsResult<Vec<String>> {
        Ok(self.get(path)?.xattrs.keys().cloned().collect())
    }

    /// Removing an attribute that was never set is a silent no-op.
    pub fn xattr_remove(&mut self, path: &str, name: &str) -> FsResult<()> {
        self.get_mut(path)?.xattrs.remove(name);
        Ok(())
    }

    /// Record a real-file snapshot under `path`, replacing an earlier one.
    /// Local nodes are never overwritten.
    pub fn cache_passthrough(&mut self, path: &str, mut node: Node) -> Node {
        if let Some(existing) = self.nodes.get(path) {
            if existing.origin == NodeOrigin::Local {
                return existing.clone();
            }
            node.xattrs = existing.xattrs.clone();
        }
        node.origin = NodeOrigin::Passthrough;
        if node.kind.has_content() {
            self.contents.entry(path.to_string()).or_default();
        }
        self.nodes.insert(path.to_string(), node.clone());
        node
    }

    /// Forget a cached real-file snapshot whose source disappeared
    pub fn drop_passthrough(&mut self, path: &str) {
        if self.nodes.get(path).map(|node| node.origin) == Some(NodeOrigin::Passthrough) {
            self.nodes.remove(path);
            self.contents.remove(path);
        }
    }
}
