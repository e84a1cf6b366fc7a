// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Emulation handlers and their dispatch registry.
//!
//! A handler owns one path prefix of the virtual filesystem. Dispatch
//! selects the handler with the longest registered prefix of the
//! requested path; handlers compose by explicitly delegating to the
//! generic `/proc/sys` handler for entries they do not emulate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{FileInfo, Message};
use crate::nstype::NsType;
use crate::nsx::NsExec;
use crate::state::{ContainerEntry, ContainerRegistry};
use crate::{Error, Result};

mod meminfo;
mod swaps;
mod sys_common;
mod sys_net_unix;

pub use meminfo::ProcMeminfo;
pub use swaps::ProcSwaps;
pub use sys_common::ProcSysCommon;
pub use sys_net_unix::ProcSysNetUnix;

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

/// The master-side context of one filesystem operation.
#[derive(Clone, Debug, Default)]
pub struct HandlerRequest {
    /// Kernel-assigned request id
    pub id: u64,
    /// The process performing the operation
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub offset: i64,
    pub size: u32,
    /// Open flags, for open operations
    pub flags: i32,
    /// Payload, for write operations
    pub data: Vec<u8>,
}

/// A node of the virtual filesystem, identified by its full path.
#[derive(Clone, Debug)]
pub struct IoNode {
    path: PathBuf,
}

impl IoNode {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap_or("")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmuKind {
    File,
    Dir,
}

/// State guarded by a resource's lock.
#[derive(Debug, Default)]
pub struct ResourceState {
    /// Largest value this resource has been observed or allowed to hold
    pub max_seen: Option<i64>,
}

/// One leaf whose content the daemon synthesizes.
///
/// The lock serializes read-modify-write sequences on this resource
/// only; unrelated resources never contend with each other.
#[derive(Debug)]
pub struct EmuResource {
    pub kind: EmuKind,
    pub mode: u32,
    pub enabled: bool,
    state: tokio::sync::Mutex<ResourceState>,
}

impl EmuResource {
    pub fn file(mode: u32) -> Arc<Self> {
        Arc::new(Self {
            kind: EmuKind::File,
            mode,
            enabled: true,
            state: tokio::sync::Mutex::new(ResourceState::default()),
        })
    }

    pub fn dir(mode: u32) -> Arc<Self> {
        Arc::new(Self {
            kind: EmuKind::Dir,
            mode,
            enabled: true,
            state: tokio::sync::Mutex::new(ResourceState::default()),
        })
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ResourceState> {
        self.state.lock().await
    }
}

/// Behavior of one emulated path prefix.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn prefix(&self) -> &'static str;

    fn enabled(&self) -> bool {
        true
    }

    /// The emulated resource registered under the given leaf name.
    fn resource(&self, _name: &str) -> Option<Arc<EmuResource>> {
        None
    }

    async fn lookup(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo>;

    async fn getattr(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo> {
        self.lookup(svc, node, req).await
    }

    async fn open(&self, svc: &HandlerService, node: &IoNode, req: &HandlerRequest)
        -> Result<()>;

    async fn close(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        _req: &HandlerRequest,
    ) -> Result<()> {
        Ok(())
    }

    async fn read(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>>;

    async fn write(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<usize>;

    async fn read_dir_all(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<FileInfo>>;
}

/// Does `prefix` cover `path`, respecting component boundaries?
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    path.len() == prefix.len()
        || prefix.ends_with('/')
        || path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// The registry of handlers plus the services they share.
///
/// Populated once at startup and read-only afterwards, so lookups need
/// no locking.
pub struct HandlerService {
    handlers: HashMap<String, Arc<dyn Handler>>,
    nsx: NsExec,
    state: Arc<ContainerRegistry>,
}

impl HandlerService {
    pub fn new(nsx: NsExec, state: Arc<ContainerRegistry>) -> Self {
        Self {
            handlers: HashMap::new(),
            nsx,
            state,
        }
    }

    /// Build the service with the standard handler set registered.
    pub fn with_default_handlers(nsx: NsExec, state: Arc<ContainerRegistry>) -> Self {
        let mut svc = Self::new(nsx, state);
        svc.register(Arc::new(ProcSysCommon::new()));
        svc.register(Arc::new(ProcSysNetUnix::new()));
        svc.register(Arc::new(ProcMeminfo::new()));
        svc.register(Arc::new(ProcSwaps::new()));
        svc
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let prefix = handler.prefix().trim_end_matches('/').to_string();
        tracing::debug!(name = handler.name(), %prefix, "registering handler");
        self.handlers.insert(prefix, handler);
    }

    /// Select the handler with the longest registered prefix of `path`.
    pub fn find(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .filter(|(prefix, handler)| handler.enabled() && prefix_matches(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Fetch a handler by its exact registered prefix, for delegation.
    pub fn find_exact(&self, prefix: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(prefix.trim_end_matches('/'))
            .map(Arc::clone)
    }

    /// Names of registered prefixes directly below the given directory.
    pub fn children_of(&self, path: &str) -> Vec<String> {
        let base = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .filter_map(|prefix| prefix.strip_prefix(&base))
            .map(|rest| match rest.split_once('/') {
                Some((first, _)) => first.to_string(),
                None => rest.to_string(),
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn state(&self) -> &ContainerRegistry {
        &self.state
    }

    pub fn nsx(&self) -> &NsExec {
        &self.nsx
    }

    /// The container owning the caller of this request.
    pub fn container_of(&self, req: &HandlerRequest) -> Result<Arc<ContainerEntry>> {
        self.state.lookup_caller(req.pid)
    }

    fn handler_for(&self, path: &str) -> Result<Arc<dyn Handler>> {
        self.find(path)
            .ok_or_else(|| Error::UnknownHandler(path.to_string()))
    }

    pub async fn lookup(&self, path: &str, req: &HandlerRequest) -> Result<FileInfo> {
        let handler = self.handler_for(path)?;
        handler.lookup(self, &IoNode::new(path), req).await
    }

    pub async fn getattr(&self, path: &str, req: &HandlerRequest) -> Result<FileInfo> {
        let handler = self.handler_for(path)?;
        handler.getattr(self, &IoNode::new(path), req).await
    }

    pub async fn open(&self, path: &str, req: &HandlerRequest) -> Result<()> {
        let handler = self.handler_for(path)?;
        handler.open(self, &IoNode::new(path), req).await
    }

    pub async fn close(&self, path: &str, req: &HandlerRequest) -> Result<()> {
        let handler = self.handler_for(path)?;
        handler.close(self, &IoNode::new(path), req).await
    }

    pub async fn read(&self, path: &str, req: &HandlerRequest) -> Result<Vec<u8>> {
        let handler = self.handler_for(path)?;
        handler.read(self, &IoNode::new(path), req).await
    }

    pub async fn write(&self, path: &str, req: &HandlerRequest) -> Result<usize> {
        let handler = self.handler_for(path)?;
        handler.write(self, &IoNode::new(path), req).await
    }

    pub async fn read_dir_all(&self, path: &str, req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        let handler = self.handler_for(path)?;
        handler.read_dir_all(self, &IoNode::new(path), req).await
    }

    fn target_of(&self, req: &HandlerRequest) -> Result<u32> {
        Ok(self.container_of(req)?.init_pid)
    }

    /// Stat a path from inside the caller's container.
    pub async fn ns_lookup(&self, req: &HandlerRequest, path: &str) -> Result<FileInfo> {
        let target = self.target_of(req)?;
        let response = self
            .nsx
            .run(
                req.pid,
                target,
                NsType::ALL.to_vec(),
                Message::LookupRequest { path: path.to_string() },
            )
            .await?;
        match response {
            Message::LookupResponse(info) => Ok(info),
            other => Err(unexpected_response(other)),
        }
    }

    /// Probe a path for access from inside the caller's container.
    pub async fn ns_open(
        &self,
        req: &HandlerRequest,
        path: &str,
        flags: i32,
        mode: u32,
    ) -> Result<()> {
        let target = self.target_of(req)?;
        let response = self
            .nsx
            .run(
                req.pid,
                target,
                NsType::ALL.to_vec(),
                Message::OpenFileRequest(crate::message::OpenFilePayload {
                    path: path.to_string(),
                    flags,
                    mode,
                }),
            )
            .await?;
        match response {
            Message::OpenFileResponse => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    /// Read a file's trimmed content from inside the caller's container.
    pub async fn ns_read_file(&self, req: &HandlerRequest, path: &str) -> Result<String> {
        let target = self.target_of(req)?;
        let response = self
            .nsx
            .run(
                req.pid,
                target,
                NsType::ALL.to_vec(),
                Message::ReadFileRequest { path: path.to_string() },
            )
            .await?;
        match response {
            Message::ReadFileResponse(content) => Ok(content),
            other => Err(unexpected_response(other)),
        }
    }

    /// Write file content from inside the caller's container.
    pub async fn ns_write_file(
        &self,
        req: &HandlerRequest,
        path: &str,
        content: &str,
    ) -> Result<()> {
        let target = self.target_of(req)?;
        let response = self
            .nsx
            .run(
                req.pid,
                target,
                NsType::ALL.to_vec(),
                Message::WriteFileRequest {
                    path: path.to_string(),
                    content: content.to_string(),
                },
            )
            .await?;
        match response {
            Message::WriteFileResponse => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    /// List a directory from inside the caller's container.
    pub async fn ns_read_dir(&self, req: &HandlerRequest, path: &str) -> Result<Vec<FileInfo>> {
        let target = self.target_of(req)?;
        let response = self
            .nsx
            .run(
                req.pid,
                target,
                NsType::ALL.to_vec(),
                Message::ReadDirRequest { path: path.to_string() },
            )
            .await?;
        match response {
            Message::ReadDirResponse(entries) => Ok(entries),
            other => Err(unexpected_response(other)),
        }
    }
}

fn unexpected_response(message: Message) -> Error {
    Error::Protocol(format!("unexpected response: {:?}", message.kind()))
}

/// A synthetic file entry for an emulated resource.
pub(crate) fn synthetic_file_info(
    name: &str,
    resource: &EmuResource,
    container: &ContainerEntry,
) -> FileInfo {
    let mtime_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    let type_bits = match resource.kind {
        EmuKind::File => libc::S_IFREG,
        EmuKind::Dir => libc::S_IFDIR,
    };
    FileInfo {
        name: name.to_string(),
        size: 0,
        mode: type_bits | resource.mode,
        mtime_secs,
        is_dir: resource.kind == EmuKind::Dir,
        ino: 0,
        uid: container.root_uid,
        gid: container.root_gid,
    }
}
