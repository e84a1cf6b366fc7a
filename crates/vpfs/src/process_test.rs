// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::resolve_proc_self;

#[rstest(
    path,
    expected,
    case("/proc/self/mountinfo", "/proc/4242/mountinfo"),
    case("/proc/self", "/proc/4242"),
    case("/proc/self/ns/mnt", "/proc/4242/ns/mnt"),
    case("/proc/selfish", "/proc/selfish"),
    case("/proc/4242/stat", "/proc/4242/stat"),
    case("/etc/passwd", "/etc/passwd")
)]
fn test_resolve_proc_self(path: &str, expected: &str) {
    assert_eq!(resolve_proc_self(path, 4242), expected);
}
