// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Netlink-style framing for the helper bootstrap message.
//!
//! The very first thing a spawned helper reads from its inherited
//! socket is a netlink-framed attribute listing the namespace paths to
//! join. The header/attribute layout follows `netlink(7)`: a 16-byte
//! message header, then attributes of 4-byte-aligned `nlattr` cells.

use std::io::Read;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./netlink_test.rs"]
mod netlink_test;

/// Message type for helper bootstrap instructions.
pub const INIT_MSG: u16 = 62000;
/// Attribute carrying the comma-separated `type:path` namespace list.
pub const NS_PATHS_ATTR: u16 = 27282;

const NLMSG_HDRLEN: usize = 16;
const NLA_HDRLEN: usize = 4;

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// One byte-valued attribute of a bootstrap message.
#[derive(Clone, Debug, PartialEq)]
pub struct Bytemsg {
    pub kind: u16,
    pub value: Vec<u8>,
}

/// Serialize a bootstrap request with the given attributes.
pub fn serialize_request(attrs: &[Bytemsg]) -> Vec<u8> {
    let payload_len: usize = attrs
        .iter()
        .map(|attr| align4(NLA_HDRLEN + attr.value.len()))
        .sum();
    let total = NLMSG_HDRLEN + payload_len;

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&INIT_MSG.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // flags
    buf.extend_from_slice(&0u32.to_ne_bytes()); // seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid

    for attr in attrs {
        let attr_len = (NLA_HDRLEN + attr.value.len()) as u16;
        buf.extend_from_slice(&attr_len.to_ne_bytes());
        buf.extend_from_slice(&attr.kind.to_ne_bytes());
        buf.extend_from_slice(&attr.value);
        buf.resize(buf.len() + (align4(attr.value.len()) - attr.value.len()), 0);
    }
    buf
}

/// Read one bootstrap request from the stream and return its attributes.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Vec<Bytemsg>> {
    let mut header = [0u8; NLMSG_HDRLEN];
    reader.read_exact(&mut header)?;

    let total = u32::from_ne_bytes(header[0..4].try_into().unwrap()) as usize;
    let kind = u16::from_ne_bytes(header[4..6].try_into().unwrap());
    if kind != INIT_MSG {
        return Err(Error::Protocol(format!(
            "unexpected bootstrap message type {kind}"
        )));
    }
    if total < NLMSG_HDRLEN {
        return Err(Error::Protocol("bootstrap message too short".to_string()));
    }

    let mut payload = vec![0u8; total - NLMSG_HDRLEN];
    reader.read_exact(&mut payload)?;

    let mut attrs = Vec::new();
    let mut offset = 0;
    while offset + NLA_HDRLEN <= payload.len() {
        let attr_len =
            u16::from_ne_bytes(payload[offset..offset + 2].try_into().unwrap()) as usize;
        let attr_kind = u16::from_ne_bytes(payload[offset + 2..offset + 4].try_into().unwrap());
        if attr_len < NLA_HDRLEN || offset + attr_len > payload.len() {
            return Err(Error::Protocol("malformed bootstrap attribute".to_string()));
        }
        attrs.push(Bytemsg {
            kind: attr_kind,
            value: payload[offset + NLA_HDRLEN..offset + attr_len].to_vec(),
        });
        offset += align4(attr_len);
    }
    Ok(attrs)
}
