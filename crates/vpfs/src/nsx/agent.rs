// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Agent mode: the namespace-resident half of the request fabric.
//!
//! [`run`] executes in the re-executed binary (argv[1] selects this
//! mode) and drives the three-hop descent: the first process forks the
//! middle child and exits so the master can confirm a clean launch; the
//! middle child joins the target namespaces, forks the agent so it is a
//! full member of the pid namespace, reports both pids, and exits; the
//! agent performs exactly one operation and answers on the pipe.
//!
//! Namespace membership is per-thread, so everything here stays on the
//! one thread that called `setns`; no runtime is created and no thread
//! is ever spawned in this mode.

use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::socket::{self, sockopt, ControlMessageOwned, MsgFlags, UnixCredentials};
use nix::unistd::ForkResult;

use super::netlink::{self, NS_PATHS_ATTR};
use super::{HelperPids, INITPIPE_ENV};
use crate::message::{
    self,
    ChownPayload,
    FileInfo,
    IoError,
    Message,
    MountPayload,
    OpenFilePayload,
    UmountPayload,
};
use crate::nstype::NsType;
use crate::process::{adjust_personality, resolve_proc_self};
use crate::{mountinfo, Error, Result};

#[cfg(test)]
#[path = "./agent_test.rs"]
mod agent_test;

/// Entry point for agent mode.
pub fn run() -> Result<()> {
    let pipe_fd = std::env::var(INITPIPE_ENV)
        .map_err(|_| Error::Protocol(format!("{INITPIPE_ENV} not set in agent environment")))?
        .parse::<i32>()
        .map_err(|err| Error::Protocol(format!("bad {INITPIPE_ENV} value: {err}")))?;

    // Safety: the fd was arranged by the master before exec and is not
    // owned by anything else in this process
    let mut pipe = unsafe { UnixStream::from_raw_fd(pipe_fd) };

    // shed any environment the master did not intend for us
    let inherited: Vec<_> = std::env::vars_os().map(|(key, _)| key).collect();
    for key in inherited {
        std::env::remove_var(key);
    }

    let attrs = netlink::read_request(&mut pipe)?;
    let ns_paths = attrs
        .iter()
        .find(|attr| attr.kind == NS_PATHS_ATTR)
        .map(|attr| parse_ns_paths(&attr.value))
        .transpose()?
        .unwrap_or_default();

    // first hop: hand off to the middle child and report a clean start
    match unsafe { nix::unistd::fork() }
        .map_err(|err| Error::wrap_nix(err, "Failed to fork middle child"))?
    {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => (),
    }

    join_namespaces(&ns_paths)?;

    // second hop: entering a pid namespace only takes effect for
    // children, so the agent proper must be a fresh fork
    match unsafe { nix::unistd::fork() }
        .map_err(|err| Error::wrap_nix(err, "Failed to fork agent"))?
    {
        ForkResult::Parent { child } => {
            let report = HelperPids {
                pid: child.as_raw(),
                pid_first: nix::unistd::getpid().as_raw(),
            };
            message::write_frame_json(&mut pipe, &report)?;
            std::process::exit(0);
        }
        ForkResult::Child => (),
    }

    let caller_pid = recv_caller_creds(&pipe)?;

    let response = match message::read_frame(&mut pipe).and_then(|buf| Message::decode(&buf)) {
        Ok(request) => process_request(caller_pid, request),
        Err(err) => Message::ErrorResponse(IoError::new(
            libc::EINVAL,
            format!("could not decode request: {err}"),
        )),
    };

    message::write_frame(&mut pipe, &response.encode()?)?;
    Ok(())
}

fn parse_ns_paths(value: &[u8]) -> Result<Vec<(NsType, PathBuf)>> {
    let text = std::str::from_utf8(value)
        .map_err(|err| Error::Protocol(format!("namespace list is not UTF-8: {err}")))?;
    let mut paths = Vec::new();
    for entry in text.split(',').filter(|entry| !entry.is_empty()) {
        let (kind, path) = entry.split_once(':').ok_or_else(|| {
            Error::Protocol(format!("malformed namespace entry: {entry}"))
        })?;
        paths.push((NsType::from_str(kind)?, PathBuf::from(path)));
    }
    Ok(paths)
}

/// Attach this thread to each listed namespace, in the order given.
///
/// All namespace files are opened before the first join: as soon as
/// the mount namespace changes, paths under `/proc` refer to the
/// container's view and the remaining host paths would be meaningless.
/// The master ordered the list for joining already; in particular the
/// user namespace, when present, comes first. Namespaces we are
/// already a member of are skipped: rejoining the current user
/// namespace is rejected by the kernel.
fn join_namespaces(ns_paths: &[(NsType, PathBuf)]) -> Result<()> {
    let mut files = Vec::with_capacity(ns_paths.len());
    for (kind, path) in ns_paths {
        let target = nix::sys::stat::stat(path)
            .map_err(|err| Error::wrap_nix(err, format!("Failed to stat {path:?}")))?;
        let own_path = kind.proc_path(std::process::id());
        if let Ok(own) = nix::sys::stat::stat(&own_path) {
            if own.st_ino == target.st_ino && own.st_dev == target.st_dev {
                continue;
            }
        }
        let file = std::fs::File::open(path)
            .map_err(|err| Error::wrap_io(err, format!("Failed to open {path:?}")))?;
        files.push((kind, file));
    }
    for (kind, file) in files {
        nix::sched::setns(file, nix::sched::CloneFlags::empty())
            .map_err(|err| Error::wrap_nix(err, format!("Failed to join {kind} namespace")))?;
    }
    Ok(())
}

/// Receive the caller's identity as socket credentials.
fn recv_caller_creds(pipe: &UnixStream) -> Result<u32> {
    socket::setsockopt(pipe, sockopt::PassCred, &true)
        .map_err(|err| Error::wrap_nix(err, "Failed to enable credential passing"))?;

    let mut data = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut data)];
    let mut cmsg_buf = nix::cmsg_space!(UnixCredentials);
    let msg = socket::recvmsg::<()>(
        pipe.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(|err| Error::wrap_nix(err, "Failed to receive caller credentials"))?;

    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmCredentials(creds) = cmsg {
            return Ok(creds.pid() as u32);
        }
    }
    Err(Error::Protocol("no caller credentials received".to_string()))
}

/// Execute one request on behalf of `caller_pid`.
///
/// Never fails outward; every error becomes an `ErrorResponse` carrying
/// the errno observed here, so the master can surface it faithfully.
pub fn process_request(caller_pid: u32, request: Message) -> Message {
    let result = match request {
        Message::LookupRequest { path } => lookup(caller_pid, &path),
        Message::OpenFileRequest(payload) => open_file(caller_pid, &payload),
        Message::ReadFileRequest { path } => read_file(caller_pid, &path),
        Message::WriteFileRequest { path, content } => write_file(caller_pid, &path, &content),
        Message::ReadDirRequest { path } => read_dir(caller_pid, &path),
        Message::MountRequest(batch) => mount_batch(caller_pid, batch),
        Message::UmountRequest(batch) => umount_batch(caller_pid, batch),
        Message::ChownRequest(batch) => chown_batch(caller_pid, batch),
        Message::MountInfoRequest => mount_info(),
        Message::MountInodeRequest { mountpoints } => mount_inodes(caller_pid, &mountpoints),
        Message::SleepRequest { seconds } => sleep(&seconds),
        other => Err(Error::Protocol(format!(
            "unsupported request: {:?}",
            other.kind()
        ))),
    };
    match result {
        Ok(response) => response,
        Err(err) => Message::ErrorResponse(IoError::from(&err)),
    }
}

fn file_info_from_stat(name: String, stat: &nix::sys::stat::FileStat) -> FileInfo {
    FileInfo {
        name,
        size: stat.st_size,
        mode: stat.st_mode,
        mtime_secs: stat.st_mtime,
        is_dir: (stat.st_mode & libc::S_IFMT) == libc::S_IFDIR,
        ino: stat.st_ino,
        uid: stat.st_uid,
        gid: stat.st_gid,
    }
}

fn lookup(caller_pid: u32, path: &str) -> Result<Message> {
    let resolved = resolve_proc_self(path, caller_pid);
    let stat = nix::sys::stat::stat(resolved.as_str())?;
    let name = std::path::Path::new(&resolved)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| resolved.clone());
    Ok(Message::LookupResponse(file_info_from_stat(name, &stat)))
}

/// Open and immediately close the target.
///
/// This both verifies access and triggers whatever open-time behavior
/// the pseudo-file has; nothing retains the descriptor.
fn open_file(caller_pid: u32, payload: &OpenFilePayload) -> Result<Message> {
    let resolved = resolve_proc_self(&payload.path, caller_pid);
    let fd = nix::fcntl::open(
        resolved.as_str(),
        nix::fcntl::OFlag::from_bits_truncate(payload.flags),
        nix::sys::stat::Mode::from_bits_truncate(payload.mode),
    )?;
    let _ = nix::unistd::close(fd);
    Ok(Message::OpenFileResponse)
}

fn read_file(caller_pid: u32, path: &str) -> Result<Message> {
    let resolved = resolve_proc_self(path, caller_pid);
    let content = std::fs::read_to_string(&resolved)?;
    Ok(Message::ReadFileResponse(content.trim().to_string()))
}

fn write_file(caller_pid: u32, path: &str, content: &str) -> Result<Message> {
    let resolved = resolve_proc_self(path, caller_pid);
    std::fs::write(&resolved, content)?;
    Ok(Message::WriteFileResponse)
}

fn read_dir(caller_pid: u32, path: &str) -> Result<Message> {
    let resolved = resolve_proc_self(path, caller_pid);
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&resolved)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        match nix::sys::stat::stat(&entry.path()) {
            Ok(stat) => entries.push(file_info_from_stat(name, &stat)),
            // pseudo-filesystem entries can vanish between listing and stat
            Err(nix::errno::Errno::ENOENT) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Message::ReadDirResponse(entries))
}

fn mount_batch(caller_pid: u32, mut batch: Vec<MountPayload>) -> Result<Message> {
    if batch.is_empty() {
        return Ok(Message::MountResponse);
    }

    // overlayfs stamps the mounting process's identity into what it
    // creates, so become the caller first
    if batch[0].fstype == "overlay" {
        if let Some(header) = &batch[0].header {
            adjust_personality(header)?;
        }
    }

    let mut completed = 0;
    let mut failure = None;
    for payload in batch.iter_mut() {
        payload.source = resolve_proc_self(&payload.source, caller_pid);
        payload.target = resolve_proc_self(&payload.target, caller_pid);
        let source = (!payload.source.is_empty()).then_some(payload.source.as_str());
        let fstype = (!payload.fstype.is_empty()).then_some(payload.fstype.as_str());
        let data = (!payload.data.is_empty()).then_some(payload.data.as_str());
        if let Err(err) = nix::mount::mount(
            source,
            payload.target.as_str(),
            fstype,
            nix::mount::MsFlags::from_bits_truncate(payload.flags as libc::c_ulong),
            data,
        ) {
            failure = Some(Error::from(err));
            break;
        }
        completed += 1;
    }

    match failure {
        None => Ok(Message::MountResponse),
        Some(err) => {
            // undo what we did, newest first; remounts are left alone
            // because the state they replaced is not retained
            for payload in batch[..completed].iter().rev() {
                let flags = nix::mount::MsFlags::from_bits_truncate(payload.flags as libc::c_ulong);
                if flags.contains(nix::mount::MsFlags::MS_REMOUNT) {
                    continue;
                }
                if let Err(err) = nix::mount::umount(payload.target.as_str()) {
                    tracing::warn!(?err, target = %payload.target, "rollback unmount failed");
                }
            }
            Err(err)
        }
    }
}

fn umount_batch(caller_pid: u32, mut batch: Vec<UmountPayload>) -> Result<Message> {
    for payload in batch.iter_mut() {
        payload.target = resolve_proc_self(&payload.target, caller_pid);
        nix::mount::umount2(
            payload.target.as_str(),
            nix::mount::MntFlags::from_bits_truncate(payload.flags),
        )?;
    }
    Ok(Message::UmountResponse)
}

fn chown_batch(caller_pid: u32, mut batch: Vec<ChownPayload>) -> Result<Message> {
    for payload in batch.iter_mut() {
        payload.target = resolve_proc_self(&payload.target, caller_pid);
        nix::unistd::chown(
            payload.target.as_str(),
            Some(nix::unistd::Uid::from_raw(payload.uid)),
            Some(nix::unistd::Gid::from_raw(payload.gid)),
        )?;
    }
    Ok(Message::ChownResponse)
}

fn mount_info() -> Result<Message> {
    let records = mountinfo::parse_file("/proc/self/mountinfo")?;
    Ok(Message::MountInfoResponse(records))
}

fn mount_inodes(caller_pid: u32, mountpoints: &[String]) -> Result<Message> {
    let mut inodes = Vec::with_capacity(mountpoints.len());
    for mountpoint in mountpoints {
        let resolved = resolve_proc_self(mountpoint, caller_pid);
        let stat = nix::sys::stat::stat(resolved.as_str())?;
        inodes.push(stat.st_ino);
    }
    Ok(Message::MountInodeResponse(inodes))
}

fn sleep(seconds: &str) -> Result<Message> {
    let interval = seconds
        .trim()
        .parse::<u64>()
        .map_err(|err| Error::new(format!("bad sleep interval '{seconds}': {err}")))?;
    std::thread::sleep(std::time::Duration::from_secs(interval));
    Ok(Message::SleepResponse)
}
