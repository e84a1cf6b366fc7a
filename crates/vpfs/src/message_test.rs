// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{
    read_frame,
    write_frame,
    ChownPayload,
    FileInfo,
    IoError,
    Message,
    MountHeader,
    MountPayload,
    OpenFilePayload,
    UmountPayload,
    MAX_FRAME_SIZE,
};
use crate::mountinfo::MountInfo;

fn sample_file_info() -> FileInfo {
    FileInfo {
        name: "max_dgram_qlen".to_string(),
        size: 4,
        mode: 0o100644,
        mtime_secs: 1700000000,
        is_dir: false,
        ino: 42,
        uid: 100000,
        gid: 100000,
    }
}

fn sample_mount_info() -> MountInfo {
    MountInfo {
        mount_id: 36,
        parent_id: 35,
        major_minor: "98:0".to_string(),
        root: "/mnt1".to_string(),
        mountpoint: "/mnt2".to_string(),
        options: "rw,noatime".to_string(),
        optional_fields: vec!["master:1".to_string()],
        fstype: "ext3".to_string(),
        source: "/dev/root".to_string(),
        super_options: "rw,errors=continue".to_string(),
    }
}

fn all_variants() -> Vec<Message> {
    vec![
        Message::LookupRequest {
            path: "/proc/sys/net/unix/max_dgram_qlen".to_string(),
        },
        Message::LookupResponse(sample_file_info()),
        Message::OpenFileRequest(OpenFilePayload {
            path: "/proc/sys/net/unix/max_dgram_qlen".to_string(),
            flags: libc::O_RDONLY,
            mode: 0,
        }),
        Message::OpenFileResponse,
        Message::ReadFileRequest {
            path: "/proc/sys/net/unix/max_dgram_qlen".to_string(),
        },
        Message::ReadFileResponse("512".to_string()),
        Message::WriteFileRequest {
            path: "/proc/sys/net/unix/max_dgram_qlen".to_string(),
            content: "128".to_string(),
        },
        Message::WriteFileResponse,
        Message::ReadDirRequest {
            path: "/proc/sys/net/unix".to_string(),
        },
        Message::ReadDirResponse(vec![sample_file_info()]),
        Message::MountRequest(vec![MountPayload {
            source: "/a".to_string(),
            target: "/m1".to_string(),
            fstype: "overlay".to_string(),
            flags: libc::MS_BIND as u64,
            data: String::new(),
            header: Some(MountHeader {
                uid: 0,
                gid: 0,
                root: "/".to_string(),
                cwd: "/".to_string(),
                capabilities: vec!["CAP_SYS_ADMIN".to_string()],
            }),
        }]),
        Message::MountResponse,
        Message::UmountRequest(vec![UmountPayload {
            target: "/m1".to_string(),
            flags: 0,
        }]),
        Message::UmountResponse,
        Message::ChownRequest(vec![ChownPayload {
            target: "/m1".to_string(),
            uid: 100000,
            gid: 100000,
        }]),
        Message::ChownResponse,
        Message::MountInfoRequest,
        Message::MountInfoResponse(vec![sample_mount_info()]),
        Message::MountInodeRequest {
            mountpoints: vec!["/m1".to_string(), "/m2".to_string()],
        },
        Message::MountInodeResponse(vec![11, 12]),
        Message::SleepRequest {
            seconds: "1".to_string(),
        },
        Message::SleepResponse,
        Message::ErrorResponse(IoError::new(libc::ENOENT, "no such file or directory")),
    ]
}

#[rstest]
fn test_round_trip_every_variant() {
    for message in all_variants() {
        let encoded = message.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, message, "round trip failed for {:?}", message.kind());
    }
}

#[rstest]
fn test_unknown_tag_rejected() {
    let result = Message::decode(br#"{"type": "frobnicate_request"}"#);
    assert!(matches!(result, Err(crate::Error::Protocol(_))));
}

#[rstest]
fn test_missing_payload_rejected() {
    let result = Message::decode(br#"{"type": "lookup_request"}"#);
    assert!(matches!(result, Err(crate::Error::Protocol(_))));
}

#[rstest]
fn test_payload_free_variants_accept_absent_payload() {
    let decoded = Message::decode(br#"{"type": "mount_info_request"}"#).unwrap();
    assert_eq!(decoded, Message::MountInfoRequest);
}

#[rstest]
fn test_error_response_surfaces_as_errno() {
    let response = Message::ErrorResponse(IoError::new(libc::EPERM, "operation not permitted"));
    let err = response.into_result().unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));
}

#[rstest]
fn test_success_response_passes_through() {
    let response = Message::ReadFileResponse("512".to_string());
    assert_eq!(
        response.clone().into_result().unwrap(),
        Message::ReadFileResponse("512".to_string())
    );
}

#[rstest]
fn test_frame_round_trip() {
    let mut buf = Vec::new();
    write_frame(&mut buf, b"hello").unwrap();
    let mut cursor = std::io::Cursor::new(buf);
    assert_eq!(read_frame(&mut cursor).unwrap(), b"hello");
}

#[rstest]
fn test_frame_round_trip_over_socket() {
    let (mut a, mut b) = std::os::unix::net::UnixStream::pair().unwrap();
    let message = Message::ReadFileRequest {
        path: "/proc/sys/net/unix/max_dgram_qlen".to_string(),
    };
    write_frame(&mut a, &message.encode().unwrap()).unwrap();
    let received = Message::decode(&read_frame(&mut b).unwrap()).unwrap();
    assert_eq!(received, message);
}

#[rstest]
fn test_oversized_frame_rejected() {
    let oversized = (MAX_FRAME_SIZE + 1).to_be_bytes();
    let mut cursor = std::io::Cursor::new(oversized.to_vec());
    assert!(read_frame(&mut cursor).is_err());
}
