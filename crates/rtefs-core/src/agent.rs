// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! External build agent interface

use std::path::PathBuf;

/// The compilation agent fed by the reserved directory
#[cfg_attr(test, mockall::automock)]
pub trait BuildAgent: Send + Sync {
    /// Compile `content` as `filename`. Runs on a build thread and may block
    /// for as long as the build takes.
    fn submit(&self, filename: &str, content: &[u8]) -> anyhow::Result<()>;

    /// Directory whose real files back the passthrough subtree
    fn working_directory(&self) -> PathBuf;
}
