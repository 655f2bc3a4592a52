// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for RTEFS

use std::collections::BTreeMap;
use std::time::SystemTime;

/// Permission bits kept on a node (the file-type tag lives in [`NodeKind`])
pub const PERMISSION_MASK: u32 = 0o7777;

/// Filesystem node types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RegularFile,
    Symlink,
}

impl NodeKind {
    /// `S_IFMT` bits for this kind
    pub fn type_bits(self) -> u32 {
        match self {
            NodeKind::Directory => libc::S_IFDIR as u32,
            NodeKind::RegularFile => libc::S_IFREG as u32,
            NodeKind::Symlink => libc::S_IFLNK as u32,
        }
    }

    /// Classify a raw `st_mode`. Anything that is neither a directory nor a
    /// symlink is reported as a regular file.
    pub fn from_mode(mode: u32) -> Self {
        let fmt = mode & libc::S_IFMT as u32;
        if fmt == libc::S_IFDIR as u32 {
            NodeKind::Directory
        } else if fmt == libc::S_IFLNK as u32 {
            NodeKind::Symlink
        } else {
            NodeKind::RegularFile
        }
    }

    /// Whether a content entry accompanies nodes of this kind
    pub fn has_content(self) -> bool {
        !matches!(self, NodeKind::Directory)
    }
}

/// Where a node's metadata came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Created through this filesystem
    Local,
    /// Snapshot of a real file from the agent's working directory
    Passthrough,
}

/// File timestamps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub created: SystemTime,
    pub modified: SystemTime,
    pub accessed: SystemTime,
}

impl FileTimes {
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            modified: now,
            accessed: now,
        }
    }
}

/// Filesystem node: the metadata half of a path entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub permissions: u32,
    pub owner: Option<u32>,
    pub group: Option<u32>,
    pub size: u64,
    pub link_count: u32,
    pub times: FileTimes,
    pub xattrs: BTreeMap<String, Vec<u8>>,
    pub origin: NodeOrigin,
}

impl Node {
    pub fn directory(permissions: u32) -> Self {
        Self::new(NodeKind::Directory, permissions, 2)
    }

    pub fn regular(permissions: u32) -> Self {
        Self::new(NodeKind::RegularFile, permissions, 1)
    }

    pub fn symlink(target_len: u64) -> Self {
        let mut node = Self::new(NodeKind::Symlink, 0o777, 1);
        node.size = target_len;
        node
    }

    fn new(kind: NodeKind, permissions: u32, link_count: u32) -> Self {
        Self {
            kind,
            permissions: permissions & PERMISSION_MASK,
            owner: None,
            group: None,
            size: 0,
            link_count,
            times: FileTimes::now(),
            xattrs: BTreeMap::new(),
            origin: NodeOrigin::Local,
        }
    }

    /// Full `st_mode` (type bits plus permissions)
    pub fn mode(&self) -> u32 {
        self.kind.type_bits() | self.permissions
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Opaque open-file handle. Never reused within a process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// Filesystem statistics reported by `statfs`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatfsData {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}
