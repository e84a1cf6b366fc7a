// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{parse, parse_line};

#[rstest]
fn test_parse_line_with_optional_fields() {
    let record = parse_line(
        "36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue",
    )
    .unwrap();
    assert_eq!(record.mount_id, 36);
    assert_eq!(record.parent_id, 35);
    assert_eq!(record.major_minor, "98:0");
    assert_eq!(record.root, "/mnt1");
    assert_eq!(record.mountpoint, "/mnt2");
    assert_eq!(record.options, "rw,noatime");
    assert_eq!(record.optional_fields, vec!["master:1".to_string()]);
    assert_eq!(record.fstype, "ext3");
    assert_eq!(record.source, "/dev/root");
    assert_eq!(record.super_options, "rw,errors=continue");
}

#[rstest]
fn test_parse_line_without_optional_fields() {
    let record =
        parse_line("22 26 0:21 / /proc rw,nosuid,nodev,noexec - proc proc rw").unwrap();
    assert!(record.optional_fields.is_empty());
    assert_eq!(record.fstype, "proc");
    assert_eq!(record.mountpoint, "/proc");
}

#[rstest]
fn test_parse_line_unescapes_whitespace() {
    let record = parse_line(
        "40 35 8:1 / /mnt/with\\040space rw shared:5 - ext4 /dev/sda1 rw",
    )
    .unwrap();
    assert_eq!(record.mountpoint, "/mnt/with space");
}

#[rstest]
fn test_parse_document_skips_blank_lines() {
    let records = parse(
        "22 26 0:21 / /proc rw - proc proc rw\n\
         \n\
         23 26 0:22 / /sys rw shared:2 - sysfs sysfs rw\n",
    )
    .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].fstype, "sysfs");
}

#[rstest]
#[case("36 35 98:0 /mnt1")]
#[case("bogus 35 98:0 /mnt1 /mnt2 rw - ext3 /dev/root rw")]
#[case("36 35 98:0 /mnt1 /mnt2 rw master:1 ext3 /dev/root rw")]
fn test_malformed_lines_rejected(#[case] line: &str) {
    assert!(parse_line(line).is_err());
}
