// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol between the daemon and its in-namespace agents.
//!
//! Each message travels as a length-prefixed JSON envelope:
//!
//! ```text
//! +----------------+--------------------------------------+
//! | Length (4 BE)  | { "type": ..., "payload": ... }      |
//! +----------------+--------------------------------------+
//! ```
//!
//! Decoding happens in two phases: the envelope names the variant, and
//! the raw payload bytes are then decoded per variant. New variants can
//! be added without disturbing existing decoders.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::mountinfo::MountInfo;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./message_test.rs"]
mod message_test;

/// Frames larger than this are rejected on both ends of the transport.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// The variant tag carried in every envelope.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    LookupRequest,
    LookupResponse,
    OpenFileRequest,
    OpenFileResponse,
    ReadFileRequest,
    ReadFileResponse,
    WriteFileRequest,
    WriteFileResponse,
    ReadDirRequest,
    ReadDirResponse,
    MountRequest,
    MountResponse,
    UmountRequest,
    UmountResponse,
    ChownRequest,
    ChownResponse,
    MountInfoRequest,
    MountInfoResponse,
    MountInodeRequest,
    MountInodeResponse,
    SleepRequest,
    SleepResponse,
    ErrorResponse,
}

/// File metadata as observed from inside the target namespaces.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub mode: u32,
    pub mtime_secs: i64,
    pub is_dir: bool,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
}

/// An error captured at the agent, transported back as-is.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IoError {
    pub errno: i32,
    pub message: String,
}

impl IoError {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

impl From<&Error> for IoError {
    fn from(err: &Error) -> Self {
        Self {
            errno: err.raw_os_error().unwrap_or(libc::EIO),
            message: err.to_string(),
        }
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Error::Errno(err.message, err.errno)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenFilePayload {
    pub path: String,
    pub flags: i32,
    pub mode: u32,
}

/// Credentials and root context applied to the agent before an
/// overlayfs mount; overlayfs records the mounting process's identity
/// in kernel-visible metadata, so the agent must look like the caller.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MountHeader {
    pub uid: u32,
    pub gid: u32,
    pub root: String,
    pub cwd: String,
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MountPayload {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub flags: u64,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MountHeader>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UmountPayload {
    pub target: String,
    pub flags: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChownPayload {
    pub target: String,
    pub uid: u32,
    pub gid: u32,
}

/// One bidirectional transaction's worth of content: either a request
/// for the agent or the response it produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    LookupRequest { path: String },
    LookupResponse(FileInfo),
    OpenFileRequest(OpenFilePayload),
    OpenFileResponse,
    ReadFileRequest { path: String },
    ReadFileResponse(String),
    WriteFileRequest { path: String, content: String },
    WriteFileResponse,
    ReadDirRequest { path: String },
    ReadDirResponse(Vec<FileInfo>),
    MountRequest(Vec<MountPayload>),
    MountResponse,
    UmountRequest(Vec<UmountPayload>),
    UmountResponse,
    ChownRequest(Vec<ChownPayload>),
    ChownResponse,
    MountInfoRequest,
    MountInfoResponse(Vec<MountInfo>),
    MountInodeRequest { mountpoints: Vec<String> },
    MountInodeResponse(Vec<u64>),
    SleepRequest { seconds: String },
    SleepResponse,
    ErrorResponse(IoError),
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct EnvelopeIn<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

#[derive(Serialize, Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Serialize, Deserialize)]
struct WritePayload {
    path: String,
    content: String,
}

#[derive(Serialize, Deserialize)]
struct MountInodePayload {
    mountpoints: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct SleepPayload {
    seconds: String,
}

fn required<T: DeserializeOwned>(
    kind: MessageType,
    payload: Option<&RawValue>,
) -> Result<T> {
    let Some(raw) = payload else {
        return Err(Error::Protocol(format!("missing payload for {kind:?}")));
    };
    serde_json::from_str(raw.get())
        .map_err(|err| Error::Protocol(format!("bad payload for {kind:?}: {err}")))
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::LookupRequest { .. } => MessageType::LookupRequest,
            Message::LookupResponse(_) => MessageType::LookupResponse,
            Message::OpenFileRequest(_) => MessageType::OpenFileRequest,
            Message::OpenFileResponse => MessageType::OpenFileResponse,
            Message::ReadFileRequest { .. } => MessageType::ReadFileRequest,
            Message::ReadFileResponse(_) => MessageType::ReadFileResponse,
            Message::WriteFileRequest { .. } => MessageType::WriteFileRequest,
            Message::WriteFileResponse => MessageType::WriteFileResponse,
            Message::ReadDirRequest { .. } => MessageType::ReadDirRequest,
            Message::ReadDirResponse(_) => MessageType::ReadDirResponse,
            Message::MountRequest(_) => MessageType::MountRequest,
            Message::MountResponse => MessageType::MountResponse,
            Message::UmountRequest(_) => MessageType::UmountRequest,
            Message::UmountResponse => MessageType::UmountResponse,
            Message::ChownRequest(_) => MessageType::ChownRequest,
            Message::ChownResponse => MessageType::ChownResponse,
            Message::MountInfoRequest => MessageType::MountInfoRequest,
            Message::MountInfoResponse(_) => MessageType::MountInfoResponse,
            Message::MountInodeRequest { .. } => MessageType::MountInodeRequest,
            Message::MountInodeResponse(_) => MessageType::MountInodeResponse,
            Message::SleepRequest { .. } => MessageType::SleepRequest,
            Message::SleepResponse => MessageType::SleepResponse,
            Message::ErrorResponse(_) => MessageType::ErrorResponse,
        }
    }

    /// Serialize this message into envelope bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::LookupRequest { path }
            | Message::ReadFileRequest { path }
            | Message::ReadDirRequest { path } => {
                Some(serde_json::value::to_raw_value(&PathPayload {
                    path: path.clone(),
                })?)
            }
            Message::LookupResponse(info) => Some(serde_json::value::to_raw_value(info)?),
            Message::OpenFileRequest(payload) => {
                Some(serde_json::value::to_raw_value(payload)?)
            }
            Message::ReadFileResponse(content) => {
                Some(serde_json::value::to_raw_value(content)?)
            }
            Message::WriteFileRequest { path, content } => {
                Some(serde_json::value::to_raw_value(&WritePayload {
                    path: path.clone(),
                    content: content.clone(),
                })?)
            }
            Message::ReadDirResponse(entries) => {
                Some(serde_json::value::to_raw_value(entries)?)
            }
            Message::MountRequest(batch) => Some(serde_json::value::to_raw_value(batch)?),
            Message::UmountRequest(batch) => Some(serde_json::value::to_raw_value(batch)?),
            Message::ChownRequest(batch) => Some(serde_json::value::to_raw_value(batch)?),
            Message::MountInfoResponse(records) => {
                Some(serde_json::value::to_raw_value(records)?)
            }
            Message::MountInodeRequest { mountpoints } => {
                Some(serde_json::value::to_raw_value(&MountInodePayload {
                    mountpoints: mountpoints.clone(),
                })?)
            }
            Message::MountInodeResponse(inodes) => {
                Some(serde_json::value::to_raw_value(inodes)?)
            }
            Message::SleepRequest { seconds } => {
                Some(serde_json::value::to_raw_value(&SleepPayload {
                    seconds: seconds.clone(),
                })?)
            }
            Message::ErrorResponse(err) => Some(serde_json::value::to_raw_value(err)?),
            Message::OpenFileResponse
            | Message::WriteFileResponse
            | Message::MountResponse
            | Message::UmountResponse
            | Message::ChownResponse
            | Message::MountInfoRequest
            | Message::SleepResponse => None,
        };
        Ok(serde_json::to_vec(&EnvelopeOut {
            kind: self.kind(),
            payload: payload.as_deref(),
        })?)
    }

    /// Decode envelope bytes back into a message.
    ///
    /// The envelope is decoded first to learn the variant, then the raw
    /// payload is decoded with that variant's own shape.
    pub fn decode(data: &[u8]) -> Result<Message> {
        let envelope: EnvelopeIn =
            serde_json::from_slice(data).map_err(|err| Error::Protocol(err.to_string()))?;
        let kind = envelope.kind;
        let payload = envelope.payload;
        Ok(match kind {
            MessageType::LookupRequest => {
                let p: PathPayload = required(kind, payload)?;
                Message::LookupRequest { path: p.path }
            }
            MessageType::LookupResponse => Message::LookupResponse(required(kind, payload)?),
            MessageType::OpenFileRequest => Message::OpenFileRequest(required(kind, payload)?),
            MessageType::OpenFileResponse => Message::OpenFileResponse,
            MessageType::ReadFileRequest => {
                let p: PathPayload = required(kind, payload)?;
                Message::ReadFileRequest { path: p.path }
            }
            MessageType::ReadFileResponse => Message::ReadFileResponse(required(kind, payload)?),
            MessageType::WriteFileRequest => {
                let p: WritePayload = required(kind, payload)?;
                Message::WriteFileRequest {
                    path: p.path,
                    content: p.content,
                }
            }
            MessageType::WriteFileResponse => Message::WriteFileResponse,
            MessageType::ReadDirRequest => {
                let p: PathPayload = required(kind, payload)?;
                Message::ReadDirRequest { path: p.path }
            }
            MessageType::ReadDirResponse => Message::ReadDirResponse(required(kind, payload)?),
            MessageType::MountRequest => Message::MountRequest(required(kind, payload)?),
            MessageType::MountResponse => Message::MountResponse,
            MessageType::UmountRequest => Message::UmountRequest(required(kind, payload)?),
            MessageType::UmountResponse => Message::UmountResponse,
            MessageType::ChownRequest => Message::ChownRequest(required(kind, payload)?),
            MessageType::ChownResponse => Message::ChownResponse,
            MessageType::MountInfoRequest => Message::MountInfoRequest,
            MessageType::MountInfoResponse => Message::MountInfoResponse(required(kind, payload)?),
            MessageType::MountInodeRequest => {
                let p: MountInodePayload = required(kind, payload)?;
                Message::MountInodeRequest {
                    mountpoints: p.mountpoints,
                }
            }
            MessageType::MountInodeResponse => {
                Message::MountInodeResponse(required(kind, payload)?)
            }
            MessageType::SleepRequest => {
                let p: SleepPayload = required(kind, payload)?;
                Message::SleepRequest { seconds: p.seconds }
            }
            MessageType::SleepResponse => Message::SleepResponse,
            MessageType::ErrorResponse => Message::ErrorResponse(required(kind, payload)?),
        })
    }

    /// Convert a response message into a result, surfacing a transported
    /// `ErrorResponse` as the error it carries.
    pub fn into_result(self) -> Result<Message> {
        match self {
            Message::ErrorResponse(err) => Err(err.into()),
            other => Ok(other),
        }
    }
}

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Protocol("frame too large".to_string()))?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"
        )));
    }
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a serializable value as one frame.
pub fn write_frame_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    write_frame(writer, &serde_json::to_vec(value)?)
}

/// Read one frame and deserialize it.
pub fn read_frame_json<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let buf = read_frame(reader)?;
    Ok(serde_json::from_slice(&buf)?)
}
