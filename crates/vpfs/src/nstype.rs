// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./nstype_test.rs"]
mod nstype_test;

/// One kind of kernel namespace, named on the wire and under
/// `/proc/<pid>/ns/` by its kernel name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NsType {
    User,
    Pid,
    Net,
    Mnt,
    Ipc,
    Uts,
    Cgroup,
}

impl NsType {
    /// All namespace kinds, in join order: the user namespace must be
    /// entered before any other, because joining it is what grants the
    /// privilege to join the rest.
    pub const ALL: [NsType; 7] = [
        NsType::User,
        NsType::Pid,
        NsType::Net,
        NsType::Mnt,
        NsType::Ipc,
        NsType::Uts,
        NsType::Cgroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NsType::User => "user",
            NsType::Pid => "pid",
            NsType::Net => "net",
            NsType::Mnt => "mnt",
            NsType::Ipc => "ipc",
            NsType::Uts => "uts",
            NsType::Cgroup => "cgroup",
        }
    }

    /// The path of this namespace for the given process, eg `/proc/42/ns/mnt`
    pub fn proc_path(&self, pid: u32) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.as_str()))
    }

    fn join_rank(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for NsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(NsType::User),
            "pid" => Ok(NsType::Pid),
            "net" => Ok(NsType::Net),
            "mnt" => Ok(NsType::Mnt),
            "ipc" => Ok(NsType::Ipc),
            "uts" => Ok(NsType::Uts),
            "cgroup" => Ok(NsType::Cgroup),
            other => Err(Error::String(format!("unknown namespace type: {other}"))),
        }
    }
}

/// Order a namespace list for joining, placing the user namespace first.
///
/// The relative order of the remaining types is normalized to the kernel
/// join order as well, so that two lists naming the same set produce the
/// same descent.
pub fn order_for_join(namespaces: &mut [NsType]) {
    namespaces.sort_by_key(|ns| ns.join_rank());
}
