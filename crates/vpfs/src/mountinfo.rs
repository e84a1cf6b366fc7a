// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Parsing of `/proc/<pid>/mountinfo`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./mountinfo_test.rs"]
mod mountinfo_test;

/// One parsed mountinfo line.
///
/// See `proc(5)` for the field layout; optional fields between the
/// mount options and the separator are preserved verbatim.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MountInfo {
    pub mount_id: u32,
    pub parent_id: u32,
    pub major_minor: String,
    pub root: String,
    pub mountpoint: String,
    pub options: String,
    pub optional_fields: Vec<String>,
    pub fstype: String,
    pub source: String,
    pub super_options: String,
}

/// Octal escapes the kernel applies to whitespace in mount paths.
fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Parse a single mountinfo line.
pub fn parse_line(line: &str) -> Result<MountInfo> {
    let mut fields = line.split_whitespace();
    let mut next = |name: &str| {
        fields
            .next()
            .ok_or_else(|| Error::String(format!("mountinfo line missing field '{name}': {line}")))
    };

    let mount_id = next("mount id")?
        .parse::<u32>()
        .map_err(|err| Error::String(format!("bad mount id: {err}")))?;
    let parent_id = next("parent id")?
        .parse::<u32>()
        .map_err(|err| Error::String(format!("bad parent id: {err}")))?;
    let major_minor = next("major:minor")?.to_string();
    let root = unescape(next("root")?);
    let mountpoint = unescape(next("mount point")?);
    let options = next("mount options")?.to_string();

    let mut optional_fields = Vec::new();
    loop {
        let field = next("optional field separator")?;
        if field == "-" {
            break;
        }
        optional_fields.push(field.to_string());
    }

    let fstype = next("filesystem type")?.to_string();
    let source = unescape(next("mount source")?);
    let super_options = next("super options")?.to_string();

    Ok(MountInfo {
        mount_id,
        parent_id,
        major_minor,
        root,
        mountpoint,
        options,
        optional_fields,
        fstype,
        source,
        super_options,
    })
}

/// Parse an entire mountinfo document.
pub fn parse(content: &str) -> Result<Vec<MountInfo>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// Read and parse the mountinfo of the given file, typically
/// `/proc/self/mountinfo` or `/proc/<pid>/mountinfo`.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<MountInfo>> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|err| Error::wrap_io(err, format!("Failed to read {:?}", path.as_ref())))?;
    parse(&content)
}
