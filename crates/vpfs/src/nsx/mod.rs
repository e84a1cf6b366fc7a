// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! The namespace-crossing request fabric.
//!
//! The daemon cannot touch a container's kernel state from outside its
//! namespaces, so every such operation is shipped to a transient agent
//! process spawned by re-executing our own binary in agent mode. One
//! [`Event`] owns one such descent: the helper chain, the socket pair
//! connecting master and agent, the request, and its response.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::nstype::NsType;
use crate::{Error, Result};

pub mod agent;
mod event;
pub mod netlink;
mod reaper;

pub use event::Event;
pub use reaper::Reaper;

/// The argv[1] value that switches a re-executed binary into agent mode.
pub const AGENT_ARG: &str = "nsenter";
/// Environment variable naming the inherited socket's fd number.
pub const INITPIPE_ENV: &str = "_LIBCONTAINER_INITPIPE";
/// The fd number at which helpers inherit their socket.
pub const HELPER_PIPE_FD: i32 = 3;

/// Pids reported up the pipe by the middle child of a descent.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct HelperPids {
    /// The agent, the process that survives inside the namespaces
    pub pid: i32,
    /// The middle child itself, so the master can wait on it
    pub pid_first: i32,
}

/// Handle used by the rest of the daemon to launch descents.
#[derive(Clone, Debug)]
pub struct NsExec {
    reaper: std::sync::Arc<Reaper>,
}

impl Default for NsExec {
    fn default() -> Self {
        Self::new()
    }
}

impl NsExec {
    pub fn new() -> Self {
        Self {
            reaper: Reaper::spawn(),
        }
    }

    pub fn reaper(&self) -> &std::sync::Arc<Reaper> {
        &self.reaper
    }

    /// Build a synchronous event on behalf of `caller_pid`, targeting
    /// the namespaces of `target_pid`.
    pub fn event(
        &self,
        caller_pid: u32,
        target_pid: u32,
        namespaces: Vec<NsType>,
        request: Message,
    ) -> Event {
        Event::new(
            caller_pid,
            target_pid,
            namespaces,
            request,
            false,
            std::sync::Arc::clone(&self.reaper),
        )
    }

    /// Build an asynchronous event; the caller is responsible for
    /// eventually terminating it.
    pub fn event_async(
        &self,
        caller_pid: u32,
        target_pid: u32,
        namespaces: Vec<NsType>,
        request: Message,
    ) -> Event {
        Event::new(
            caller_pid,
            target_pid,
            namespaces,
            request,
            true,
            std::sync::Arc::clone(&self.reaper),
        )
    }

    /// Dispatch an event, hosting its blocking helper-chain I/O off the
    /// async worker threads.
    pub async fn execute(&self, mut event: Event) -> Result<Event> {
        tokio::task::spawn_blocking(move || {
            event.send()?;
            Ok(event)
        })
        .await
        .map_err(|err| Error::String(format!("nsexec task panicked or was cancelled: {err}")))?
    }

    /// Terminate a previously dispatched asynchronous event.
    pub async fn terminate(&self, mut event: Event) -> Result<()> {
        tokio::task::spawn_blocking(move || event.terminate())
            .await
            .map_err(|err| Error::String(format!("nsexec task panicked or was cancelled: {err}")))?
    }

    /// Run one synchronous request to completion and return the
    /// response, surfacing a transported agent error as `Err`.
    pub async fn run(
        &self,
        caller_pid: u32,
        target_pid: u32,
        namespaces: Vec<NsType>,
        request: Message,
    ) -> Result<Message> {
        let event = self.event(caller_pid, target_pid, namespaces, request);
        let mut event = self.execute(event).await?;
        event
            .take_response()
            .ok_or_else(|| Error::Protocol("event completed without a response".to_string()))?
            .into_result()
    }
}
