// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for RTEFS Core

use serde::{Deserialize, Serialize};

use crate::{FsError, FsResult, StatfsData};

/// Kernel cache policy for attribute and entry replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

/// Constants reported by `statfs`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatfsPolicy {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub name_max: u32,
}

impl Default for StatfsPolicy {
    fn default() -> Self {
        Self {
            block_size: 512,
            blocks: 4096,
            blocks_free: 2048,
            blocks_available: 2048,
            name_max: 255,
        }
    }
}

impl StatfsPolicy {
    pub(crate) fn to_stats(&self, files: u64) -> StatfsData {
        StatfsData {
            block_size: self.block_size,
            blocks: self.blocks,
            blocks_free: self.blocks_free,
            blocks_available: self.blocks_available,
            files,
            files_free: u64::MAX - files,
            name_max: self.name_max,
        }
    }
}

/// Filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Reserved directory whose writes trigger builds
    pub input_dir: String,
    /// Permissions of the reserved directory while the gate is open
    pub input_mode: u32,
    /// Permissions of the root directory
    pub root_mode: u32,
    pub cache: CachePolicy,
    pub statfs: StatfsPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            input_dir: "/input".to_string(),
            input_mode: 0o777,
            root_mode: 0o777,
            cache: CachePolicy::default(),
            statfs: StatfsPolicy::default(),
        }
    }
}

impl FsConfig {
    /// Strips trailing slashes from `input_dir`. The reserved directory must
    /// be a single component directly under root.
    pub fn validate(&mut self) -> FsResult<()> {
        let trimmed = self.input_dir.trim_end_matches('/');
        let name = trimmed.strip_prefix('/').ok_or(FsError::InvalidArgument)?;
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FsError::InvalidArgument);
        }
        self.input_dir = trimmed.to_string();
        Ok(())
    }
}
