// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use tokio::signal::unix::{signal, SignalKind};
use vpfs::handler::HandlerService;
use vpfs::nsx::NsExec;
use vpfs::state::{ContainerEntry, ContainerRegistry};
use vpfs_vfs::Session;

mod args;

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}

fn main2() -> i32 {
    // agent mode is selected on the raw argv before anything else
    // happens: the re-executed helper must stay single-threaded, so no
    // runtime, logging, or argument parsing may come first
    if std::env::args().nth(1).as_deref() == Some(vpfs::nsx::AGENT_ARG) {
        return match vpfs::nsx::agent::run() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("vpfs nsenter: {err}");
                1
            }
        };
    }

    let opt = CmdDaemon::parse();
    args::configure_logging(opt.verbose);

    let config = match vpfs::get_config() {
        Err(err) => {
            tracing::error!(err = ?err, "failed to load config");
            return 1;
        }
        Ok(config) => config,
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Err(err) => {
            tracing::error!("Failed to establish runtime: {:?}", err);
            return 1;
        }
        Ok(rt) => rt,
    };
    let result = rt.block_on(opt.run(&config));
    // long running tasks may still be waiting for signals or events
    // which will never come; don't block forever on shutdown
    rt.shutdown_timeout(std::time::Duration::from_secs(2));

    match result {
        Err(err) => {
            tracing::error!("{err:?}");
            1
        }
        Ok(code) => code,
    }
}

/// Serve containers a virtualized view of kernel pseudo-filesystems
#[derive(Debug, Parser)]
#[clap(name = "vpfs")]
pub struct CmdDaemon {
    /// Make the output more verbose, can be given multiple times
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Where to export the virtual filesystem; the container runtime
    /// bind-mounts paths from under here into containers
    #[clap(long)]
    mountpoint: Option<std::path::PathBuf>,

    /// Pre-register a container as ID:INIT_PID[:UID:GID], repeatable.
    ///
    /// Containers are normally registered by the runtime at creation
    /// time; this flag exists for bring-up and testing.
    #[clap(long = "container", value_name = "SPEC")]
    containers: Vec<String>,
}

impl CmdDaemon {
    pub async fn run(&self, config: &vpfs::Config) -> Result<i32> {
        // helpers that outlive their event reparent to us; being a
        // subreaper is what lets the reaper thread collect them
        if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1) } != 0 {
            return Err(std::io::Error::last_os_error()).context("Failed to become subreaper");
        }

        let registry = Arc::new(ContainerRegistry::new());
        for spec in &self.containers {
            let entry = parse_container_spec(spec)?;
            registry
                .register(entry)
                .with_context(|| format!("Failed to register container '{spec}'"))?;
        }

        let nsx = NsExec::new();
        let service = Arc::new(HandlerService::with_default_handlers(
            nsx,
            Arc::clone(&registry),
        ));

        let mountpoint = self
            .mountpoint
            .clone()
            .unwrap_or_else(|| config.filesystem.mountpoint.clone());
        std::fs::create_dir_all(&mountpoint)
            .with_context(|| format!("Failed to create mountpoint {mountpoint:?}"))?;

        let mut vfs_config = vpfs_vfs::Config {
            ttl: std::time::Duration::from_secs(config.filesystem.cache_timeout_secs),
            ..Default::default()
        };
        vfs_config.mount_options.insert(MountOption::FSName("vpfs".into()));
        vfs_config.mount_options.insert(MountOption::DefaultPermissions);
        vfs_config.mount_options.insert(MountOption::AutoUnmount);
        if config.filesystem.allow_other {
            vfs_config.mount_options.insert(MountOption::AllowOther);
        }

        tracing::debug!("establishing fuse session at {mountpoint:?}...");
        let session = Session::new(service, vfs_config.clone());
        let mount_opts = session.mount_options();
        let mut fuse_session = fuser::Session::new(session, &mountpoint, &mount_opts)
            .context("Failed to create a FUSE session")?;

        let mut interrupt = signal(SignalKind::interrupt()).context("interrupt signal handler")?;
        let mut quit = signal(SignalKind::quit()).context("quit signal handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("terminate signal handler")?;

        tracing::info!("serving {}", mountpoint.display());
        // the filesystem could run in the current thread, but a blocking
        // future can be scheduled and shut down by the runtime as needed
        let fut = tokio::task::spawn_blocking(move || fuse_session.run());
        tokio::select! {
            res = fut => {
                tracing::info!("filesystem shutting down");
                res.context("FUSE session task failed")?.context("FUSE session failed")?;
            }
            // any interruption signal unmounts and shuts down cleanly
            _ = terminate.recv() => tracing::warn!("terminate signal received, shutting down"),
            _ = interrupt.recv() => tracing::warn!("interrupt signal received, shutting down"),
            _ = quit.recv() => tracing::warn!("quit signal received, shutting down"),
        }
        Ok(0)
    }
}

/// Parse an `ID:INIT_PID[:UID:GID]` container spec.
fn parse_container_spec(spec: &str) -> Result<ContainerEntry> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (id, init_pid, root_uid, root_gid) = match parts.as_slice() {
        [id, pid] => (*id, *pid, "0", "0"),
        [id, pid, uid, gid] => (*id, *pid, *uid, *gid),
        _ => anyhow::bail!("container spec must be ID:INIT_PID[:UID:GID], got '{spec}'"),
    };
    Ok(ContainerEntry {
        id: id.to_string(),
        init_pid: init_pid
            .parse()
            .with_context(|| format!("bad init pid in '{spec}'"))?,
        root_uid: root_uid
            .parse()
            .with_context(|| format!("bad uid in '{spec}'"))?,
        root_gid: root_gid
            .parse()
            .with_context(|| format!("bad gid in '{spec}'"))?,
    })
}

#[cfg(test)]
mod main_test {
    use rstest::rstest;

    use super::parse_container_spec;

    #[rstest]
    fn test_parse_container_spec() {
        let entry = parse_container_spec("ctr-1:4242").unwrap();
        assert_eq!(entry.id, "ctr-1");
        assert_eq!(entry.init_pid, 4242);
        assert_eq!(entry.root_uid, 0);

        let entry = parse_container_spec("ctr-2:99:100000:100000").unwrap();
        assert_eq!(entry.root_uid, 100000);
        assert_eq!(entry.root_gid, 100000);

        assert!(parse_container_spec("ctr-3").is_err());
        assert!(parse_container_spec("ctr-4:notapid").is_err());
    }
}
