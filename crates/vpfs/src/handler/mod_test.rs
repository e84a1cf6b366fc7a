// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use rstest::rstest;

use super::{prefix_matches, EmuKind, EmuResource, HandlerService, IoNode};
use crate::nsx::NsExec;
use crate::state::ContainerRegistry;

fn service() -> HandlerService {
    HandlerService::with_default_handlers(NsExec::new(), Arc::new(ContainerRegistry::new()))
}

#[rstest(
    path,
    expected,
    case("/proc/sys/net/unix/max_dgram_qlen", "ProcSysNetUnix"),
    case("/proc/sys/net/unix", "ProcSysNetUnix"),
    case("/proc/sys/net/core/somaxconn", "ProcSysCommon"),
    case("/proc/sys/kernel/cap_last_cap", "ProcSysCommon"),
    case("/proc/sys", "ProcSysCommon"),
    case("/proc/meminfo", "ProcMeminfo"),
    case("/proc/swaps", "ProcSwaps")
)]
fn test_longest_prefix_dispatch(path: &str, expected: &str) {
    let svc = service();
    let handler = svc.find(path).expect("a handler must match");
    assert_eq!(handler.name(), expected);
}

#[rstest(
    path,
    case("/proc/cpuinfo"),
    case("/proc/sysfoo"),
    case("/proc/meminfo2"),
    case("/etc/passwd")
)]
fn test_no_handler_for_uncovered_paths(path: &str) {
    let svc = service();
    assert!(svc.find(path).is_none());
}

#[rstest]
fn test_nested_prefix_wins_over_parent() {
    // both prefixes cover the path; the longer one must be selected
    let svc = service();
    let path = "/proc/sys/net/unix/max_dgram_qlen";
    let specific = svc.find(path).unwrap();
    let parent = svc.find_exact("/proc/sys").unwrap();
    assert_ne!(specific.name(), parent.name());
    assert!(specific.prefix().len() > parent.prefix().len());
}

#[rstest]
fn test_find_exact_tolerates_trailing_slash() {
    let svc = service();
    assert!(svc.find_exact("/proc/sys/").is_some());
    assert!(svc.find_exact("/proc/sys").is_some());
    assert!(svc.find_exact("/proc/nope").is_none());
}

#[rstest]
fn test_children_of_root() {
    let svc = service();
    assert_eq!(svc.children_of("/proc"), vec!["meminfo", "swaps", "sys"]);
}

#[rstest(
    prefix,
    path,
    matches,
    case("/proc/sys", "/proc/sys", true),
    case("/proc/sys", "/proc/sys/net", true),
    case("/proc/sys", "/proc/sysrq-trigger", false),
    case("/proc/sys/net/unix", "/proc/sys/net/unix/max_dgram_qlen", true),
    case("/proc/meminfo", "/proc/meminfo", true),
    case("/proc/meminfo", "/proc/meminfo2", false)
)]
fn test_prefix_matches(prefix: &str, path: &str, matches: bool) {
    assert_eq!(prefix_matches(prefix, path), matches);
}

#[rstest]
fn test_emulated_resource_registered() {
    let svc = service();
    let handler = svc.find("/proc/sys/net/unix/max_dgram_qlen").unwrap();
    let resource = handler.resource("max_dgram_qlen").unwrap();
    assert_eq!(resource.kind, EmuKind::File);
    assert_eq!(resource.mode, 0o644);
    assert!(handler.resource("nosuch").is_none());
}

#[tokio::test]
async fn test_resource_state_persists_across_locks() {
    let resource = EmuResource::file(0o644);
    {
        let mut state = resource.lock().await;
        state.max_seen = Some(512);
    }
    let state = resource.lock().await;
    assert_eq!(state.max_seen, Some(512));
}

#[tokio::test]
async fn test_resource_lock_serializes_writers() {
    let resource = EmuResource::file(0o644);
    let guard = resource.lock().await;
    // a second writer must not be able to take the lock while the
    // first read-modify-write sequence is still in progress
    assert!(resource.state.try_lock().is_err());
    drop(guard);
    assert!(resource.state.try_lock().is_ok());
}

#[rstest]
fn test_io_node_names() {
    let node = IoNode::new("/proc/sys/net/unix/max_dgram_qlen");
    assert_eq!(node.name(), "max_dgram_qlen");
    assert_eq!(node.path_str(), "/proc/sys/net/unix/max_dgram_qlen");
}
