// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{read_request, serialize_request, Bytemsg, NS_PATHS_ATTR};

#[rstest]
fn test_round_trip() {
    let attrs = vec![Bytemsg {
        kind: NS_PATHS_ATTR,
        value: b"user:/proc/42/ns/user,mnt:/proc/42/ns/mnt".to_vec(),
    }];
    let wire = serialize_request(&attrs);
    let mut cursor = std::io::Cursor::new(wire);
    assert_eq!(read_request(&mut cursor).unwrap(), attrs);
}

#[rstest(
    len,
    case(0),
    case(1),
    case(2),
    case(3),
    case(4),
    case(5)
)]
fn test_attribute_padding(len: usize) {
    // every value length must land on a 4-byte cell boundary and
    // still decode to exactly the original bytes
    let attrs = vec![
        Bytemsg {
            kind: NS_PATHS_ATTR,
            value: vec![0xAB; len],
        },
        Bytemsg {
            kind: NS_PATHS_ATTR + 1,
            value: b"tail".to_vec(),
        },
    ];
    let wire = serialize_request(&attrs);
    assert_eq!(wire.len() % 4, 0);
    let mut cursor = std::io::Cursor::new(wire);
    assert_eq!(read_request(&mut cursor).unwrap(), attrs);
}

#[rstest]
fn test_unexpected_message_type_rejected() {
    let mut wire = serialize_request(&[]);
    // corrupt the message type field
    wire[4] = 0;
    wire[5] = 0;
    let mut cursor = std::io::Cursor::new(wire);
    assert!(read_request(&mut cursor).is_err());
}

#[rstest]
fn test_truncated_message_rejected() {
    let wire = serialize_request(&[Bytemsg {
        kind: NS_PATHS_ATTR,
        value: b"user:/proc/42/ns/user".to_vec(),
    }]);
    let mut cursor = std::io::Cursor::new(wire[..wire.len() - 4].to_vec());
    assert!(read_request(&mut cursor).is_err());
}
