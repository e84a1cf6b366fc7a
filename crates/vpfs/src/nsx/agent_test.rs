// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::{fixture, rstest};

use super::process_request;
use crate::message::{ChownPayload, IoError, Message, MountPayload, OpenFilePayload, UmountPayload};

#[fixture]
fn tmpdir() -> tempdir::TempDir {
    tempdir::TempDir::new("vpfs-agent-test").expect("create test tempdir")
}

fn own_pid() -> u32 {
    std::process::id()
}

fn expect_error(response: Message) -> IoError {
    match response {
        Message::ErrorResponse(err) => err,
        other => panic!("expected error response, got {:?}", other.kind()),
    }
}

#[rstest]
fn test_lookup(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().join("value");
    std::fs::write(&path, "512\n").unwrap();

    let response = process_request(
        own_pid(),
        Message::LookupRequest {
            path: path.to_string_lossy().to_string(),
        },
    );
    match response {
        Message::LookupResponse(info) => {
            assert_eq!(info.name, "value");
            assert_eq!(info.size, 4);
            assert!(!info.is_dir);
            assert_ne!(info.ino, 0);
        }
        other => panic!("unexpected response {:?}", other.kind()),
    }
}

#[rstest]
fn test_lookup_missing_path_reports_enoent(tmpdir: tempdir::TempDir) {
    let response = process_request(
        own_pid(),
        Message::LookupRequest {
            path: tmpdir.path().join("nosuch").to_string_lossy().to_string(),
        },
    );
    assert_eq!(expect_error(response).errno, libc::ENOENT);
}

#[rstest]
fn test_read_file_trims_content(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().join("value");
    std::fs::write(&path, "  512\n").unwrap();

    let response = process_request(
        own_pid(),
        Message::ReadFileRequest {
            path: path.to_string_lossy().to_string(),
        },
    );
    assert_eq!(response, Message::ReadFileResponse("512".to_string()));
}

#[rstest]
fn test_write_then_read(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().join("value");
    std::fs::write(&path, "512\n").unwrap();
    let path = path.to_string_lossy().to_string();

    let response = process_request(
        own_pid(),
        Message::WriteFileRequest {
            path: path.clone(),
            content: "128".to_string(),
        },
    );
    assert_eq!(response, Message::WriteFileResponse);

    let response = process_request(own_pid(), Message::ReadFileRequest { path });
    assert_eq!(response, Message::ReadFileResponse("128".to_string()));
}

#[rstest]
#[serial_test::serial] // fd counting is only reliable without concurrent tests
fn test_open_file_probe_leaves_no_descriptor(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().join("value");
    std::fs::write(&path, "512\n").unwrap();

    let before = open_fd_count();
    let response = process_request(
        own_pid(),
        Message::OpenFileRequest(OpenFilePayload {
            path: path.to_string_lossy().to_string(),
            flags: libc::O_RDONLY,
            mode: 0,
        }),
    );
    assert_eq!(response, Message::OpenFileResponse);
    assert_eq!(open_fd_count(), before);
}

#[rstest]
fn test_open_file_missing_reports_enoent(tmpdir: tempdir::TempDir) {
    let response = process_request(
        own_pid(),
        Message::OpenFileRequest(OpenFilePayload {
            path: tmpdir.path().join("nosuch").to_string_lossy().to_string(),
            flags: libc::O_RDONLY,
            mode: 0,
        }),
    );
    assert_eq!(expect_error(response).errno, libc::ENOENT);
}

#[rstest]
fn test_read_dir_sorted(tmpdir: tempdir::TempDir) {
    std::fs::write(tmpdir.path().join("bbb"), "2").unwrap();
    std::fs::write(tmpdir.path().join("aaa"), "1").unwrap();
    std::fs::create_dir(tmpdir.path().join("ccc")).unwrap();

    let response = process_request(
        own_pid(),
        Message::ReadDirRequest {
            path: tmpdir.path().to_string_lossy().to_string(),
        },
    );
    match response {
        Message::ReadDirResponse(entries) => {
            let names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
            assert_eq!(names, vec!["aaa", "bbb", "ccc"]);
            assert!(entries[2].is_dir);
        }
        other => panic!("unexpected response {:?}", other.kind()),
    }
}

#[rstest]
fn test_proc_self_paths_resolve_through_caller() {
    // with ourselves as the caller the rewrite must land back on our
    // own proc entry
    let response = process_request(
        own_pid(),
        Message::ReadFileRequest {
            path: "/proc/self/comm".to_string(),
        },
    );
    assert!(matches!(response, Message::ReadFileResponse(_)));
}

#[rstest]
fn test_mount_inodes(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().to_string_lossy().to_string();
    let expected = nix::sys::stat::stat(path.as_str()).unwrap().st_ino;

    let response = process_request(
        own_pid(),
        Message::MountInodeRequest {
            mountpoints: vec![path],
        },
    );
    assert_eq!(response, Message::MountInodeResponse(vec![expected]));
}

#[rstest]
fn test_mount_info_lists_root() {
    let response = process_request(own_pid(), Message::MountInfoRequest);
    match response {
        Message::MountInfoResponse(records) => {
            assert!(!records.is_empty());
            assert!(records.iter().any(|record| record.mountpoint == "/"));
        }
        other => panic!("unexpected response {:?}", other.kind()),
    }
}

#[rstest]
fn test_mount_empty_batch_succeeds() {
    let response = process_request(own_pid(), Message::MountRequest(Vec::new()));
    assert_eq!(response, Message::MountResponse);
}

#[rstest]
fn test_mount_failure_surfaces_errno(tmpdir: tempdir::TempDir) {
    // unprivileged, and the source does not exist either way
    let response = process_request(
        own_pid(),
        Message::MountRequest(vec![MountPayload {
            source: tmpdir.path().join("nosuch").to_string_lossy().to_string(),
            target: tmpdir.path().to_string_lossy().to_string(),
            fstype: String::new(),
            flags: libc::MS_BIND as u64,
            data: String::new(),
            header: None,
        }]),
    );
    assert_ne!(expect_error(response).errno, 0);
}

#[rstest]
fn test_umount_of_non_mountpoint_surfaces_errno(tmpdir: tempdir::TempDir) {
    let response = process_request(
        own_pid(),
        Message::UmountRequest(vec![UmountPayload {
            target: tmpdir.path().to_string_lossy().to_string(),
            flags: 0,
        }]),
    );
    assert_ne!(expect_error(response).errno, 0);
}

#[rstest]
fn test_chown_to_current_owner(tmpdir: tempdir::TempDir) {
    let path = tmpdir.path().join("value");
    std::fs::write(&path, "512\n").unwrap();

    let response = process_request(
        own_pid(),
        Message::ChownRequest(vec![ChownPayload {
            target: path.to_string_lossy().to_string(),
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        }]),
    );
    assert_eq!(response, Message::ChownResponse);
}

#[rstest]
fn test_sleep_zero() {
    let response = process_request(
        own_pid(),
        Message::SleepRequest {
            seconds: "0".to_string(),
        },
    );
    assert_eq!(response, Message::SleepResponse);
}

#[rstest]
fn test_sleep_with_bad_interval() {
    let response = process_request(
        own_pid(),
        Message::SleepRequest {
            seconds: "soon".to_string(),
        },
    );
    assert_eq!(expect_error(response).errno, libc::EINVAL);
}

#[rstest]
fn test_response_variant_as_request_is_a_protocol_error() {
    let response = process_request(own_pid(), Message::SleepResponse);
    let err = expect_error(response);
    assert_eq!(err.errno, libc::EIO);
    assert!(err.message.contains("unsupported request"));
}

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}
