// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Identity and path helpers for operating on behalf of another process.

use std::str::FromStr;

use crate::message::MountHeader;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./process_test.rs"]
mod process_test;

/// Rewrite `/proc/self/...` paths through `/proc/<pid>/...`.
///
/// The agent executes syscalls on behalf of a caller; any path the
/// caller expressed relative to its own process entry must be
/// dereferenced through that process, not through the agent.
pub fn resolve_proc_self(path: &str, caller_pid: u32) -> String {
    match path.strip_prefix("/proc/self") {
        None => path.to_string(),
        Some("") => format!("/proc/{caller_pid}"),
        Some(rest) if rest.starts_with('/') => format!("/proc/{caller_pid}{rest}"),
        Some(_) => path.to_string(),
    }
}

/// Make the current process look like the caller described by `header`:
/// root directory, working directory, uid/gid, and capability sets.
///
/// Used before overlayfs mounts, where the kernel stamps the mounting
/// process's identity into the filesystem it creates.
pub fn adjust_personality(header: &MountHeader) -> Result<()> {
    if header.root != "/" {
        nix::unistd::chroot(header.root.as_str())
            .map_err(|err| Error::wrap_nix(err, format!("Failed to chroot to {}", header.root)))?;
    }
    nix::unistd::chdir(header.cwd.as_str())
        .map_err(|err| Error::wrap_nix(err, format!("Failed to chdir to {}", header.cwd)))?;

    let uid = nix::unistd::Uid::from_raw(header.uid);
    let gid = nix::unistd::Gid::from_raw(header.gid);

    // keep permitted capabilities across the uid change so the
    // requested sets can still be applied afterwards
    if unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 1) } != 0 {
        return Err(nix::errno::Errno::last().into());
    }
    nix::unistd::setresgid(gid, gid, gid)
        .map_err(|err| Error::wrap_nix(err, "Failed to set group ids"))?;
    nix::unistd::setresuid(uid, uid, uid)
        .map_err(|err| Error::wrap_nix(err, "Failed to set user ids"))?;

    let mut wanted = caps::CapsHashSet::new();
    for name in &header.capabilities {
        let cap = caps::Capability::from_str(name)
            .map_err(|err| Error::String(format!("unknown capability '{name}': {err}")))?;
        wanted.insert(cap);
    }
    caps::set(None, caps::CapSet::Effective, &wanted)
        .map_err(|err| Error::String(format!("Failed to set effective capabilities: {err}")))?;
    caps::set(None, caps::CapSet::Permitted, &wanted)
        .map_err(|err| Error::String(format!("Failed to set permitted capabilities: {err}")))?;
    Ok(())
}
