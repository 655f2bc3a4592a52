// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RTEFS Core: an in-memory control filesystem for a real-time build agent
//!
//! Writing a file under the reserved input directory and closing it hands
//! the file's content to a [`BuildAgent`]. While the build runs the
//! reserved directory is closed to access.

pub mod agent;
pub mod config;
pub mod error;
pub mod gate;
mod launcher;
pub mod passthrough;
pub mod store;
pub mod types;
pub mod vfs;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use agent::BuildAgent;
pub use config::{CachePolicy, FsConfig, StatfsPolicy};
pub use error::{FsError, FsResult};
pub use gate::{BuildRequest, GateState};
pub use passthrough::{AttrResolver, HostAttrResolver};
pub use types::*;
pub use vfs::RteFs;
