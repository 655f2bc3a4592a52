// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inode ↔ path table for the FUSE adapter
//!
//! The kernel addresses nodes by inode while the core is path-addressed.
//! Inodes are allocated on first sight of a path and follow it across
//! renames.

use std::collections::HashMap;

use rtefs_core::store::{is_within, join};

/// Inode number the kernel uses for the mount root
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
pub struct InodeTable {
    /// inode -> path
    inodes: HashMap<u64, String>,
    /// path -> inode
    paths: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            inodes: HashMap::new(),
            paths: HashMap::new(),
            next_inode: ROOT_INO + 1,
        };
        table.record(ROOT_INO, "/".to_string());
        table
    }

    fn record(&mut self, inode: u64, path: String) {
        self.paths.insert(path.clone(), inode);
        self.inodes.insert(inode, path);
    }

    pub fn path(&self, inode: u64) -> Option<&str> {
        self.inodes.get(&inode).map(String::as_str)
    }

    /// Path of `name` inside the directory `parent`
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        self.path(parent).map(|dir| join(dir, name))
    }

    pub fn get_or_alloc(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.paths.get(path) {
            return inode;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.record(inode, path.to_string());
        inode
    }

    /// Drop the mapping for a removed path
    pub fn remove(&mut self, path: &str) -> Option<u64> {
        let inode = self.paths.remove(path)?;
        self.inodes.remove(&inode);
        Some(inode)
    }

    /// Move `old` and everything beneath it to `new`. A mapping already at
    /// `new` is replaced.
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        self.remove(new);
        let moved: Vec<(String, u64)> = self
            .paths
            .iter()
            .filter(|(path, _)| is_within(path, old))
            .map(|(path, &inode)| (path.clone(), inode))
            .collect();
        for (path, inode) in moved {
            self.paths.remove(&path);
            let target = format!("{new}{}", &path[old.len()..]);
            self.record(inode, target);
        }
    }

    /// The kernel dropped its last reference to `inode`
    pub fn forget(&mut self, inode: u64) {
        if inode == ROOT_INO {
            return;
        }
        if let Some(path) = self.inodes.remove(&inode) {
            self.paths.remove(&path);
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}
