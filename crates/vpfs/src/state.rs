// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Registry of containers served by this daemon.
//!
//! The container runtime registers each container as it creates it;
//! afterwards any process inside the container can be mapped back to
//! its owning record through the inode of its pid namespace.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./state_test.rs"]
mod state_test;

/// What the daemon knows about one registered container.
#[derive(Clone, Debug)]
pub struct ContainerEntry {
    /// Identifier assigned by the runtime
    pub id: String,
    /// The container's init process, as seen from the host
    pub init_pid: u32,
    /// Host uid that container root maps to
    pub root_uid: u32,
    /// Host gid that container root maps to
    pub root_gid: u32,
}

/// Lookup service from caller pid to owning container.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    by_pid_ns: DashMap<u64, Arc<ContainerEntry>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container, keyed by its init process's pid namespace.
    pub fn register(&self, entry: ContainerEntry) -> Result<()> {
        let inode = pid_ns_inode(entry.init_pid)?;
        tracing::debug!(id = %entry.id, init_pid = entry.init_pid, inode, "registering container");
        self.register_at(inode, entry);
        Ok(())
    }

    /// Register a container under an explicit pid-namespace inode.
    pub fn register_at(&self, pid_ns_inode: u64, entry: ContainerEntry) {
        self.by_pid_ns.insert(pid_ns_inode, Arc::new(entry));
    }

    /// Remove a container by id, returning whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        let before = self.by_pid_ns.len();
        self.by_pid_ns.retain(|_, entry| entry.id != id);
        self.by_pid_ns.len() != before
    }

    /// Resolve the caller of a filesystem request to its container.
    pub fn lookup_caller(&self, caller_pid: u32) -> Result<Arc<ContainerEntry>> {
        let inode = pid_ns_inode(caller_pid)?;
        self.by_pid_ns
            .get(&inode)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::UnknownContainer(caller_pid))
    }

    pub fn len(&self) -> usize {
        self.by_pid_ns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid_ns.is_empty()
    }
}

/// The inode identifying the pid namespace of the given process.
pub fn pid_ns_inode(pid: u32) -> Result<u64> {
    let path = format!("/proc/{pid}/ns/pid");
    let stat = nix::sys::stat::stat(path.as_str())
        .map_err(|err| Error::wrap_nix(err, format!("Failed to stat {path}")))?;
    Ok(stat.st_ino)
}
