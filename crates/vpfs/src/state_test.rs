// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{pid_ns_inode, ContainerEntry, ContainerRegistry};

fn entry(id: &str, init_pid: u32) -> ContainerEntry {
    ContainerEntry {
        id: id.to_string(),
        init_pid,
        root_uid: 100000,
        root_gid: 100000,
    }
}

#[rstest]
fn test_lookup_caller_in_same_pid_namespace() {
    // register this very process; any process sharing its pid
    // namespace (ourselves included) must resolve to the entry
    let registry = ContainerRegistry::new();
    let own_pid = std::process::id();
    registry.register(entry("ctr-1", own_pid)).unwrap();

    let found = registry.lookup_caller(own_pid).unwrap();
    assert_eq!(found.id, "ctr-1");
    assert_eq!(found.init_pid, own_pid);
}

#[rstest]
fn test_lookup_caller_unregistered() {
    let registry = ContainerRegistry::new();
    let err = registry.lookup_caller(std::process::id()).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[rstest]
fn test_register_at_explicit_inode() {
    let registry = ContainerRegistry::new();
    registry.register_at(12345, entry("ctr-2", 99));
    assert_eq!(registry.len(), 1);
    assert!(registry.unregister("ctr-2"));
    assert!(registry.is_empty());
    assert!(!registry.unregister("ctr-2"));
}

#[rstest]
fn test_pid_ns_inode_of_missing_process() {
    // pid 0 never has a proc entry
    assert!(pid_ns_inode(0).is_err());
}

#[rstest]
fn test_pid_ns_inode_is_stable() {
    let own_pid = std::process::id();
    assert_eq!(
        pid_ns_inode(own_pid).unwrap(),
        pid_ns_inode(own_pid).unwrap()
    );
}
