// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host configuration file

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rtefs_core::FsConfig;
use serde::{Deserialize, Serialize};

/// How the build agent is reached
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Real directory mirrored under the reserved directory (default: the
    /// process working directory)
    pub working_directory: Option<PathBuf>,
    /// Program and leading arguments; the filename is appended. Empty means
    /// submissions are only logged.
    pub command: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub fs: FsConfig,
    pub agent: AgentConfig,
}

pub fn load_config(config_path: Option<&Path>) -> Result<HostConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let mut config: HostConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            config.fs.validate().with_context(|| {
                format!(
                    "input_dir {:?} in {} must name a directory directly under /",
                    config.fs.input_dir,
                    path.display()
                )
            })?;
            Ok(config)
        }
        None => Ok(HostConfig::default()),
    }
}
