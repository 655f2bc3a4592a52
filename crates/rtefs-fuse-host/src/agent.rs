// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Build agent backed by an external command

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{bail, Context, Result};
use rtefs_core::BuildAgent;
use tracing::{debug, info};

/// Runs `<program> <args...> <filename>` in the working directory with the
/// file content on stdin. Without a program, submissions are only logged.
#[derive(Clone, Debug)]
pub struct CommandAgent {
    working_directory: PathBuf,
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(working_directory: PathBuf, command: Vec<String>) -> Self {
        Self {
            working_directory,
            command,
        }
    }

    pub fn is_log_only(&self) -> bool {
        self.command.is_empty()
    }
}

impl BuildAgent for CommandAgent {
    fn submit(&self, filename: &str, content: &[u8]) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            info!(target: "rtefs::build", %filename, bytes = content.len(), "build submitted (log only)");
            return Ok(());
        };

        let mut child = Command::new(program)
            .args(args)
            .arg(filename)
            .current_dir(&self.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning build command {program}"))?;

        // stdin is fed from its own thread while output is collected.
        let feeder = child.stdin.take().map(|mut stdin| {
            let content = content.to_vec();
            thread::spawn(move || stdin.write_all(&content))
        });

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for build command {program}"))?;
        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(result) => {
                    if let Err(err) = result {
                        // EPIPE when the command exits without reading stdin
                        debug!(target: "rtefs::build", error = %err, "stdin not fully consumed");
                    }
                }
                Err(_) => bail!("stdin writer for {program} panicked"),
            }
        }

        info!(
            target: "rtefs::build",
            %filename,
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "build command exited"
        );
        if !output.status.success() {
            bail!(
                "build command {program} failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn working_directory(&self) -> PathBuf {
        self.working_directory.clone()
    }
}
