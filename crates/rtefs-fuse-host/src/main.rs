// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RTEFS FUSE Host
//!
//! Mounts the RTEFS control filesystem in the foreground. Files written
//! under the reserved directory are handed to the build agent on close.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;
mod agent;
mod config;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod errno;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod inodes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rtefs_core::RteFs;
use rtefs_logging::CliLoggingArgs;
use tracing::{info, warn};

use crate::agent::CommandAgent;
use crate::config::{load_config, HostConfig};

#[derive(Parser, Debug)]
#[command(name = "rtefs-fuse-host", version, about = "Mount the RTEFS control filesystem")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Real directory mirrored under the reserved directory
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Build command word; repeat for each argument (the filename is appended)
    #[arg(long = "agent-command", value_name = "WORD", allow_hyphen_values = true)]
    agent_command: Vec<String>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

/// Command-line flags override the configuration file.
fn apply_overrides(config: &mut HostConfig, args: &Args) {
    if let Some(dir) = &args.working_dir {
        config.agent.working_directory = Some(dir.clone());
    }
    if !args.agent_command.is_empty() {
        config.agent.command = args.agent_command.clone();
    }
}

fn build_agent(config: &HostConfig) -> Result<CommandAgent> {
    let working_directory = match &config.agent.working_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    Ok(CommandAgent::new(working_directory, config.agent.command.clone()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.clone().init("rtefs-fuse-host")?;

    info!(target: "rtefs::fuse", mount_point = %args.mount_point.display(), "Starting RTEFS FUSE host");

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    info!(target: "rtefs::fuse", ?config, "Configuration loaded");

    let agent = build_agent(&config)?;
    if agent.is_log_only() {
        warn!(target: "rtefs::build", "no build command configured; submissions are only logged");
    }
    let fs = RteFs::new(config.fs.clone(), Arc::new(agent))?;

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let filesystem = adapter::RteFsFuse::new(fs);

        let mut mount_options = vec![
            fuser::MountOption::FSName("rtefs".to_string()),
            fuser::MountOption::Subtype("rtefs".to_string()),
        ];
        if args.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }
        if args.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        info!(target: "rtefs::fuse", "Mounting filesystem...");
        let session = fuser::spawn_mount2(filesystem, &args.mount_point, &mount_options)?;
        info!(target: "rtefs::fuse", "RTEFS mounted; blocking until unmount");
        session.join();
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        warn!("FUSE support not compiled in. This binary is for testing only.");
        info!(
            input_dir = %fs.input_dir(),
            gate = ?fs.gate_state(),
            "RTEFS core initialized"
        );
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point_is_required() {
        let err = Args::try_parse_from(["rtefs-fuse-host"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::try_parse_from([
            "rtefs-fuse-host",
            "/mnt/rtefs",
            "--working-dir",
            "/srv/src",
            "--agent-command",
            "cc",
            "--agent-command",
            "-c",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.mount_point, PathBuf::from("/mnt/rtefs"));

        let mut config = HostConfig::default();
        config.agent.command = vec!["make".to_string()];
        apply_overrides(&mut config, &args);
        assert_eq!(config.agent.working_directory, Some(PathBuf::from("/srv/src")));
        assert_eq!(config.agent.command, vec!["cc", "-c"]);
    }

    #[test]
    fn test_agent_command_accepts_flag_like_words() {
        let args = Args::try_parse_from([
            "rtefs-fuse-host",
            "--agent-command",
            "make",
            "--agent-command",
            "-C",
            "--agent-command",
            "/srv/src",
            "/mnt/rtefs",
        ])
        .unwrap();
        assert_eq!(args.agent_command, vec!["make", "-C", "/srv/src"]);
        assert_eq!(args.mount_point, PathBuf::from("/mnt/rtefs"));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_config_command_kept_without_flags() {
        let args = Args::try_parse_from(["rtefs-fuse-host", "/mnt"]).unwrap();
        let mut config = HostConfig::default();
        config.agent.command = vec!["make".to_string()];
        apply_overrides(&mut config, &args);
        assert_eq!(config.agent.command, vec!["make"]);

        let agent = build_agent(&config).unwrap();
        assert!(!agent.is_log_only());
        assert_eq!(
            rtefs_core::BuildAgent::working_directory(&agent),
            std::env::current_dir().unwrap()
        );
    }
}
