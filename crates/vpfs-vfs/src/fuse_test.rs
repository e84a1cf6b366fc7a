// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use fuser::FileType;
use rstest::rstest;
use vpfs::handler::HandlerService;
use vpfs::message::FileInfo;
use vpfs::nsx::NsExec;
use vpfs::state::ContainerRegistry;

use super::{Config, Filesystem, ROOT_INODE};

fn filesystem() -> Filesystem {
    let service = Arc::new(HandlerService::with_default_handlers(
        NsExec::new(),
        Arc::new(ContainerRegistry::new()),
    ));
    Filesystem::new(service, Config::default())
}

#[rstest]
fn test_root_is_inode_one() {
    let fs = filesystem();
    let node = fs.node_of(ROOT_INODE).expect("root must be preallocated");
    assert_eq!(node.path_str(), "/proc");
}

#[rstest]
fn test_intern_is_stable() {
    let fs = filesystem();
    let (first, _) = fs.intern("/proc/sys/net/unix/max_dgram_qlen");
    let (second, _) = fs.intern("/proc/sys/net/unix/max_dgram_qlen");
    assert_eq!(first, second);

    let (other, _) = fs.intern("/proc/sys/net/unix");
    assert_ne!(first, other);
}

#[rstest]
fn test_attr_from_info() {
    let fs = filesystem();
    let info = FileInfo {
        name: "max_dgram_qlen".to_string(),
        size: 4,
        mode: 0o100644,
        mtime_secs: 1700000000,
        is_dir: false,
        ino: 99,
        uid: 100000,
        gid: 100001,
    };
    let attr = fs.attr_from_info(7, &info);
    assert_eq!(attr.ino, 7);
    assert_eq!(attr.kind, FileType::RegularFile);
    assert_eq!(attr.perm, 0o644);
    assert_eq!(attr.size, 4);
    assert_eq!(attr.uid, 100000);
    assert_eq!(attr.gid, 100001);
}

#[rstest]
fn test_attr_for_directory() {
    let fs = filesystem();
    let info = FileInfo {
        name: "unix".to_string(),
        size: 0,
        mode: 0o040555,
        mtime_secs: 0,
        is_dir: true,
        ino: 0,
        uid: 0,
        gid: 0,
    };
    let attr = fs.attr_from_info(8, &info);
    assert_eq!(attr.kind, FileType::Directory);
    assert_eq!(attr.nlink, 2);
    assert_eq!(attr.perm, 0o555);
}

#[rstest]
fn test_root_attr_is_directory() {
    let fs = filesystem();
    let attr = fs.root_attr();
    assert_eq!(attr.ino, ROOT_INODE);
    assert_eq!(attr.kind, FileType::Directory);
}
