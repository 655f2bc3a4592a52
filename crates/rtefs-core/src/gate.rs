// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Input gate guarding the reserved directory
//!
//! The gate is Closed from the moment a write-sequence under the reserved
//! directory completes until the last queued build returns. At most one
//! build is in flight; a sequence completed meanwhile waits in a single
//! pending slot where a newer snapshot replaces an older one.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{FsError, FsResult};
use crate::store::is_within;

/// Visible state of the reserved directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
}

/// One build handed to the external agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    /// Path relative to the reserved directory
    pub filename: String,
    /// Content captured when the handle was released
    pub content: Vec<u8>,
}

#[derive(Debug)]
pub struct InputGate {
    dir: String,
    state: GateState,
    in_flight: bool,
    pending: Option<BuildRequest>,
    closed_at: Option<Instant>,
}

impl InputGate {
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            state: GateState::Open,
            in_flight: false,
            pending: None,
            closed_at: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Open with no build running or queued
    pub fn is_idle(&self) -> bool {
        self.state == GateState::Open && !self.in_flight
    }

    /// Whether `path` is the reserved directory or lies beneath it
    pub fn guards(&self, path: &str) -> bool {
        is_within(path, &self.dir)
    }

    /// Path of `path` relative to the reserved directory, for paths strictly
    /// beneath it
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }

    pub fn check(&self, path: &str) -> FsResult<()> {
        if self.state == GateState::Closed && self.guards(path) {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }

    /// Permission bits reported for the reserved directory
    pub fn visible_permissions(&self, stored: u32) -> u32 {
        match self.state {
            GateState::Open => stored,
            GateState::Closed => 0,
        }
    }

    /// Close the gate for `request`. Returns the request when the caller
    /// should dispatch it now, `None` when it was queued behind a running
    /// build.
    pub fn begin(&mut self, request: BuildRequest) -> Option<BuildRequest> {
        if self.state == GateState::Open {
            self.closed_at = Some(Instant::now());
        }
        self.state = GateState::Closed;

        if self.in_flight {
            debug!(target: "rtefs::gate", filename = %request.filename, "build queued behind running build");
            if let Some(old) = self.pending.replace(request) {
                debug!(target: "rtefs::gate", filename = %old.filename, "queued build superseded");
            }
            return None;
        }

        self.in_flight = true;
        info!(target: "rtefs::gate", dir = %self.dir, filename = %request.filename, "input gate closed");
        Some(request)
    }

    /// Mark the running build finished. Hands back the queued build, if any,
    /// keeping the gate Closed; otherwise reopens it.
    pub fn finish(&mut self) -> Option<BuildRequest> {
        if let Some(next) = self.pending.take() {
            return Some(next);
        }
        self.reopen();
        None
    }

    /// Reopen after a build task died, discarding any queued build
    pub fn abort(&mut self) {
        if let Some(dropped) = self.pending.take() {
            warn!(target: "rtefs::gate", filename = %dropped.filename, "queued build discarded");
        }
        self.reopen();
    }

    fn reopen(&mut self) {
        self.in_flight = false;
        self.state = GateState::Open;
        let elapsed_ms = self
            .closed_at
            .take()
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or_default();
        info!(target: "rtefs::gate", dir = %self.dir, elapsed_ms, "input gate reopened");
    }
}
