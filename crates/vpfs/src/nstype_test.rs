// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

use rstest::rstest;

use super::{order_for_join, NsType};

#[rstest(
    nstype,
    name,
    case(NsType::User, "user"),
    case(NsType::Pid, "pid"),
    case(NsType::Net, "net"),
    case(NsType::Mnt, "mnt"),
    case(NsType::Ipc, "ipc"),
    case(NsType::Uts, "uts"),
    case(NsType::Cgroup, "cgroup")
)]
fn test_wire_names(nstype: NsType, name: &str) {
    assert_eq!(nstype.as_str(), name);
    assert_eq!(nstype.to_string(), name);
    assert_eq!(NsType::from_str(name).unwrap(), nstype);

    // the serde form matches the kernel name as well
    let encoded = serde_json::to_string(&nstype).unwrap();
    assert_eq!(encoded, format!("\"{name}\""));
    let decoded: NsType = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, nstype);
}

#[rstest]
fn test_unknown_name_rejected() {
    assert!(NsType::from_str("time").is_err());
}

#[rstest]
fn test_proc_path() {
    assert_eq!(
        NsType::Mnt.proc_path(4242),
        std::path::PathBuf::from("/proc/4242/ns/mnt")
    );
}

#[rstest]
fn test_user_namespace_ordered_first() {
    let mut namespaces = vec![NsType::Mnt, NsType::Net, NsType::User, NsType::Pid];
    order_for_join(&mut namespaces);
    assert_eq!(
        namespaces,
        vec![NsType::User, NsType::Pid, NsType::Net, NsType::Mnt]
    );
}

#[rstest]
fn test_ordering_is_stable_for_same_set() {
    let mut a = vec![NsType::Uts, NsType::User, NsType::Ipc];
    let mut b = vec![NsType::Ipc, NsType::Uts, NsType::User];
    order_for_join(&mut a);
    order_for_join(&mut b);
    assert_eq!(a, b);
}
