// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::io::{IoSlice, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;

use nix::sys::socket::{
    self,
    sockopt,
    AddressFamily,
    ControlMessage,
    MsgFlags,
    Shutdown,
    SockFlag,
    SockType,
    UnixCredentials,
};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use super::netlink;
use super::reaper::Reaper;
use super::{HelperPids, AGENT_ARG, HELPER_PIPE_FD, INITPIPE_ENV};
use crate::message::{self, Message};
use crate::nstype::{self, NsType};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./event_test.rs"]
mod event_test;

/// One bidirectional transaction between the master and an agent
/// resident in a target process's namespaces.
///
/// The event owns its socket pair and its agent process; the reaper is
/// a process-lifetime singleton it only borrows. A synchronous event
/// runs to completion inside [`Event::send`]; an asynchronous one
/// returns as soon as the request is delivered and must be finished
/// with [`Event::terminate`].
#[derive(Debug)]
pub struct Event {
    /// Pid on whose behalf this event executes; transported to the
    /// agent as its authoritative caller identity.
    pub caller_pid: u32,
    /// The process whose namespace set the agent joins, typically the
    /// init process of the caller's container.
    pub target_pid: u32,
    /// Namespace types to attach to, in join order.
    pub namespaces: Vec<NsType>,
    /// The request to execute.
    pub request: Message,

    response: Option<Message>,
    agent: Option<Pid>,
    pipe: Option<UnixStream>,
    is_async: bool,
    /// Set once an async dispatch succeeds; consumed by terminate.
    owes_end: bool,
    reaper: Arc<Reaper>,
}

impl Event {
    pub fn new(
        caller_pid: u32,
        target_pid: u32,
        mut namespaces: Vec<NsType>,
        request: Message,
        is_async: bool,
        reaper: Arc<Reaper>,
    ) -> Self {
        nstype::order_for_join(&mut namespaces);
        Self {
            caller_pid,
            target_pid,
            namespaces,
            request,
            response: None,
            agent: None,
            pipe: None,
            is_async,
            owes_end: false,
            reaper,
        }
    }

    /// The agent's pid, once the descent has been established.
    pub fn agent_pid(&self) -> Option<u32> {
        self.agent.map(|pid| pid.as_raw() as u32)
    }

    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }

    /// `nstype:/proc/<pid>/ns/<nstype>` entries for the bootstrap message.
    fn namespace_paths(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .map(|ns| format!("{ns}:/proc/{}/ns/{ns}", self.target_pid))
            .collect()
    }

    /// Dispatch this event: spawn the helper chain, deliver the request
    /// and, unless the event is asynchronous, collect the response and
    /// wait out the agent.
    pub fn send(&mut self) -> Result<()> {
        tracing::trace!(
            caller = self.caller_pid,
            target = self.target_pid,
            kind = ?self.request.kind(),
            is_async = self.is_async,
            "dispatching nsexec event"
        );
        self.reaper.descent_started();
        match self.send_inner() {
            Ok(()) => {
                if self.is_async {
                    self.owes_end = true;
                } else {
                    self.reaper.descent_ended();
                }
                Ok(())
            }
            Err(err) => {
                // drop our side of the pipe and let the reaper chase
                // whatever is left of the helper chain
                self.pipe = None;
                self.agent = None;
                self.reaper.request_reap();
                self.reaper.descent_ended();
                Err(err)
            }
        }
    }

    fn send_inner(&mut self) -> Result<()> {
        let (parent_fd, child_fd) = socket::socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|err| Error::wrap_nix(err, "Failed to create nsexec socket pair"))?;
        socket::setsockopt(&parent_fd, sockopt::PassCred, &true)
            .map_err(|err| Error::wrap_nix(err, "Failed to set socket options on nsexec pipe"))?;

        let bootstrap = netlink::serialize_request(&[netlink::Bytemsg {
            kind: netlink::NS_PATHS_ATTR,
            value: self.namespace_paths().join(",").into_bytes(),
        }]);

        let child_raw = child_fd.as_raw_fd();
        let mut cmd = Command::new("/proc/self/exe");
        cmd.arg(AGENT_ARG);
        cmd.env_clear();
        cmd.env(INITPIPE_ENV, HELPER_PIPE_FD.to_string());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        unsafe {
            cmd.pre_exec(move || {
                // move the socket to its well-known fd and make sure the
                // helper is signaled if the daemon goes away
                if child_raw == HELPER_PIPE_FD {
                    let flags = libc::fcntl(child_raw, libc::F_GETFD);
                    if flags < 0
                        || libc::fcntl(child_raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(child_raw, HELPER_PIPE_FD) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut first_child = cmd
            .spawn()
            .map_err(|err| Error::HelperProcess(format!("failed to spawn helper: {err}")))?;
        drop(child_fd);

        let mut pipe = UnixStream::from(parent_fd);
        pipe.write_all(&bootstrap)
            .map_err(|err| Error::wrap_io(err, "Failed to write bootstrap message"))?;

        let status = first_child
            .wait()
            .map_err(|err| Error::HelperProcess(format!("failed waiting for helper: {err}")))?;
        if !status.success() {
            return Err(Error::HelperProcess(format!(
                "helper exited with status {status}"
            )));
        }

        let pids: HelperPids = message::read_frame_json(&mut pipe)?;

        // the middle child reparents to us on exit; its status carries
        // no information and it may already have been collected
        let _ = waitpid(Pid::from_raw(pids.pid_first), None);

        let agent = Pid::from_raw(pids.pid);
        self.agent = Some(agent);

        // the authoritative caller identity travels out of band, so
        // that it is distinct from the kernel-assigned helper pids
        let creds = UnixCredentials::from(libc::ucred {
            pid: self.caller_pid as libc::pid_t,
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        });
        let cmsgs = [ControlMessage::ScmCredentials(&creds)];
        socket::sendmsg::<()>(
            pipe.as_raw_fd(),
            &[IoSlice::new(&[0u8])],
            &cmsgs,
            MsgFlags::empty(),
            None,
        )
        .map_err(|err| Error::wrap_nix(err, "Failed to send caller credentials"))?;

        message::write_frame(&mut pipe, &self.request.encode()?)?;

        if self.is_async {
            self.pipe = Some(pipe);
            return Ok(());
        }

        let buf = message::read_frame(&mut pipe)?;
        self.response = Some(Message::decode(&buf)?);

        if let Err(err) = socket::shutdown(pipe.as_raw_fd(), Shutdown::Write) {
            tracing::warn!(?err, "error shutting down nsexec pipe");
        }
        drop(pipe);

        let _ = waitpid(agent, None);
        self.agent = None;
        Ok(())
    }

    /// Unwind an asynchronous event: close the write side so any agent
    /// read sees EOF, kill the agent, and wait it out. Not an error
    /// path; no response is delivered.
    pub fn terminate(&mut self) -> Result<()> {
        tracing::trace!(caller = self.caller_pid, agent = ?self.agent, "terminating nsexec event");
        let owed = std::mem::take(&mut self.owes_end);
        let result = self.terminate_inner();
        if owed {
            if result.is_err() {
                self.reaper.request_reap();
            }
            self.reaper.descent_ended();
        }
        result
    }

    fn terminate_inner(&mut self) -> Result<()> {
        let Some(agent) = self.agent.take() else {
            self.pipe = None;
            return Ok(());
        };
        if let Some(pipe) = &self.pipe {
            if let Err(err) = socket::shutdown(pipe.as_raw_fd(), Shutdown::Write) {
                tracing::warn!(?err, "error shutting down nsexec pipe");
            }
        }
        nix::sys::signal::kill(agent, nix::sys::signal::Signal::SIGKILL)
            .map_err(|err| Error::wrap_nix(err, "Failed to kill nsexec agent"))?;
        let _ = waitpid(agent, None);
        self.pipe = None;
        Ok(())
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if self.owes_end {
            // an async event dropped without terminate; keep the
            // counters honest and hand the agent to the reaper
            let _ = self.terminate();
        }
    }
}
