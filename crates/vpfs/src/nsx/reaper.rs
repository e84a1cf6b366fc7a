// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Supervision of leftover helper processes.
//!
//! Most helpers are waited on directly by the event that spawned them.
//! The ones that are not (the middle child of every descent, and any
//! agent killed on an asynchronous path) reparent to the daemon, which
//! runs as a child subreaper. This module keeps count of descents in
//! flight and collects those strays in the background so they never
//! accumulate as zombies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

#[cfg(test)]
#[path = "./reaper_test.rs"]
mod reaper_test;

#[derive(Debug, Default)]
struct ReaperState {
    started: u64,
    ended: u64,
    pending_reaps: u64,
}

/// Counts descents in flight and sweeps up orphaned helpers.
#[derive(Debug)]
pub struct Reaper {
    state: Mutex<ReaperState>,
    wake: Condvar,
    shutdown: AtomicBool,
}

impl Reaper {
    /// Create the reaper and start its background sweep thread.
    pub fn spawn() -> Arc<Self> {
        let reaper = Arc::new(Self {
            state: Mutex::new(ReaperState::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let background = Arc::clone(&reaper);
        std::thread::Builder::new()
            .name("vpfs-reaper".to_string())
            .spawn(move || background.run())
            .expect("failed to spawn reaper thread");
        reaper
    }

    /// Record that a descent is starting.
    pub fn descent_started(&self) {
        let mut state = self.state.lock().expect("reaper state poisoned");
        state.started += 1;
    }

    /// Record that a descent has fully ended.
    ///
    /// Paired with exactly one `descent_started` on every path.
    pub fn descent_ended(&self) {
        let mut state = self.state.lock().expect("reaper state poisoned");
        state.ended += 1;
    }

    /// Ask the background thread to collect any waitable children.
    pub fn request_reap(&self) {
        let mut state = self.state.lock().expect("reaper state poisoned");
        state.pending_reaps += 1;
        drop(state);
        self.wake.notify_one();
    }

    /// Number of descents currently in flight.
    pub fn in_flight(&self) -> u64 {
        let state = self.state.lock().expect("reaper state poisoned");
        state.started - state.ended
    }

    /// Totals of descents started and ended since process start.
    pub fn totals(&self) -> (u64, u64) {
        let state = self.state.lock().expect("reaper state poisoned");
        (state.started, state.ended)
    }

    /// Stop the background thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn run(&self) {
        let mut state = self.state.lock().expect("reaper state poisoned");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if state.pending_reaps == 0 {
                // a periodic opportunistic sweep bounds how long any
                // stray can linger if a reap request was lost with its
                // requester
                let (next, _timeout) = self
                    .wake
                    .wait_timeout(state, Duration::from_secs(1))
                    .expect("reaper state poisoned");
                state = next;
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
            }
            state.pending_reaps = 0;
            drop(state);
            sweep();
            state = self.state.lock().expect("reaper state poisoned");
        }
    }
}

/// Collect every immediately-waitable child, silently absorbing the
/// cases where the kernel (or a direct wait elsewhere) got there first.
fn sweep() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    tracing::debug!(%pid, ?status, "reaped stray helper");
                }
            }
            Err(nix::errno::Errno::ECHILD) => return,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => {
                tracing::warn!(?err, "unexpected error while reaping helpers");
                return;
            }
        }
    }
}
