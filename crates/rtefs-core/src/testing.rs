// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test doubles for RTEFS Core
//!
//! [`RecordingAgent`] records every submission and can hold builds open so
//! tests observe the gate while it is Closed. [`StaticResolver`] serves
//! passthrough attributes from an in-memory table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::agent::BuildAgent;
use crate::error::{FsError, FsResult};
use crate::passthrough::AttrResolver;
use crate::Node;

#[derive(Default)]
struct Recorder {
    submissions: Vec<(String, Vec<u8>)>,
    held: bool,
    fail: bool,
}

pub struct RecordingAgent {
    working_directory: PathBuf,
    recorder: Mutex<Recorder>,
    changed: Condvar,
}

impl RecordingAgent {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            recorder: Mutex::new(Recorder::default()),
            changed: Condvar::new(),
        }
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent submissions block until [`Self::release_builds`]
    pub fn hold_builds(&self) {
        self.recorder().held = true;
    }

    pub fn release_builds(&self) {
        self.recorder().held = false;
        self.changed.notify_all();
    }

    /// Make submissions return an error
    pub fn fail_builds(&self) {
        self.recorder().fail = true;
    }

    pub fn submissions(&self) -> Vec<(String, Vec<u8>)> {
        self.recorder().submissions.clone()
    }

    /// Wait until at least `count` submissions arrived
    pub fn wait_for_submissions(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recorder = self.recorder();
        while recorder.submissions.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            recorder = self
                .changed
                .wait_timeout(recorder, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl BuildAgent for RecordingAgent {
    fn submit(&self, filename: &str, content: &[u8]) -> anyhow::Result<()> {
        let mut recorder = self.recorder();
        recorder
            .submissions
            .push((filename.to_string(), content.to_vec()));
        self.changed.notify_all();
        while recorder.held {
            recorder = self
                .changed
                .wait(recorder)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if recorder.fail {
            anyhow::bail!("build of {filename} failed");
        }
        Ok(())
    }

    fn working_directory(&self) -> PathBuf {
        self.working_directory.clone()
    }
}

/// Passthrough resolver answering from a table keyed by relative path
#[derive(Default)]
pub struct StaticResolver {
    nodes: Mutex<HashMap<String, Node>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, relative: &str, node: Node) {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(relative.to_string(), node);
    }

    pub fn remove(&self, relative: &str) {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(relative);
    }

    /// Every `(base, relative)` pair resolved so far
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AttrResolver for StaticResolver {
    fn resolve(&self, base: &Path, relative: &str) -> FsResult<Node> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((base.to_path_buf(), relative.to_string()));
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(relative)
            .cloned()
            .ok_or(FsError::NotFound)
    }
}
