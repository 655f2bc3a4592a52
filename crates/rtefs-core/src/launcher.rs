// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Background build dispatch
//!
//! Each dispatch runs on its own thread. The thread drains the gate's
//! pending slot before exiting, so builds never overlap, and reopens the
//! gate even when the agent panics.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{info, warn};

use crate::agent::BuildAgent;
use crate::gate::BuildRequest;
use crate::vfs::Shared;

pub(crate) struct BuildLauncher {
    shared: Arc<Shared>,
    agent: Arc<dyn BuildAgent>,
}

impl BuildLauncher {
    pub(crate) fn new(shared: Arc<Shared>, agent: Arc<dyn BuildAgent>) -> Self {
        Self { shared, agent }
    }

    /// Start a build thread for `request`. The gate must already be Closed
    /// with the build marked in flight.
    pub(crate) fn dispatch(&self, request: BuildRequest) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let agent = Arc::clone(&self.agent);
        thread::Builder::new()
            .name("rtefs-build".to_string())
            .spawn(move || run_builds(&shared, agent.as_ref(), request))
    }
}

fn run_builds(shared: &Shared, agent: &dyn BuildAgent, first: BuildRequest) {
    let _reopen_on_panic = scopeguard::guard_on_unwind((), |()| {
        warn!(target: "rtefs::build", "build agent panicked");
        shared.lock().gate.abort();
        shared.idle.notify_all();
    });

    let mut next = Some(first);
    while let Some(request) = next.take() {
        let started = Instant::now();
        info!(
            target: "rtefs::build",
            filename = %request.filename,
            bytes = request.content.len(),
            "submitting build"
        );
        match agent.submit(&request.filename, &request.content) {
            Ok(()) => info!(
                target: "rtefs::build",
                filename = %request.filename,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "build finished"
            ),
            Err(err) => warn!(
                target: "rtefs::build",
                filename = %request.filename,
                error = %err,
                "build failed"
            ),
        }

        let mut state = shared.lock();
        next = state.gate.finish();
        if next.is_none() {
            shared.idle.notify_all();
        }
    }
}
