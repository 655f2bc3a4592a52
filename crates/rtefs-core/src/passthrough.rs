// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute lookups for real files mirrored under the reserved directory

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::Node;

/// Resolves attributes of a real file `relative` to `base`
#[cfg_attr(test, mockall::automock)]
pub trait AttrResolver: Send + Sync {
    fn resolve(&self, base: &Path, relative: &str) -> FsResult<Node>;
}

/// Resolver backed by `lstat` on the host filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct HostAttrResolver;

#[cfg(unix)]
impl AttrResolver for HostAttrResolver {
    fn resolve(&self, base: &Path, relative: &str) -> FsResult<Node> {
        use std::os::unix::fs::MetadataExt;
        use std::time::UNIX_EPOCH;

        let meta = std::fs::symlink_metadata(base.join(relative)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound
            } else {
                FsError::Io(err)
            }
        })?;

        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        Ok(Node {
            kind: crate::NodeKind::from_mode(meta.mode()),
            permissions: meta.mode() & crate::PERMISSION_MASK,
            owner: Some(meta.uid()),
            group: Some(meta.gid()),
            size: meta.len(),
            link_count: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
            times: crate::FileTimes {
                created: meta.created().unwrap_or(modified),
                modified,
                accessed: meta.accessed().unwrap_or(modified),
            },
            xattrs: BTreeMap::new(),
            origin: crate::NodeOrigin::Passthrough,
        })
    }
}
