// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use fuser::{
    FileAttr,
    FileType,
    MountOption,
    ReplyAttr,
    ReplyData,
    ReplyDirectory,
    ReplyEmpty,
    ReplyEntry,
    ReplyOpen,
    ReplyWrite,
    Request,
};
use vpfs::handler::{HandlerRequest, HandlerService, IoNode};
use vpfs::message::FileInfo;

#[cfg(test)]
#[path = "./fuse_test.rs"]
mod fuse_test;

const ROOT_INODE: u64 = 1;
const BLOCK_SIZE: u32 = 512;

/// Options configuring the exported filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    /// The subtree of the virtual filesystem served at the mountpoint
    pub root: String,
    /// Owner reported for the root directory
    pub uid: nix::unistd::Uid,
    /// Group reported for the root directory
    pub gid: nix::unistd::Gid,
    /// Mount options to be used when setting up
    pub mount_options: HashSet<MountOption>,
    /// How long the kernel may cache entries and attributes
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: "/proc".to_string(),
            uid: nix::unistd::geteuid(),
            gid: nix::unistd::getegid(),
            mount_options: HashSet::new(),
            ttl: Duration::from_secs(5),
        }
    }
}

/// The identity and shape of one kernel request, captured before the
/// work moves onto the runtime.
#[derive(Clone, Copy, Debug)]
struct RequestInfo {
    unique: u64,
    uid: u32,
    gid: u32,
    pid: u32,
}

impl RequestInfo {
    fn of(req: &Request<'_>) -> Self {
        Self {
            unique: req.unique(),
            uid: req.uid(),
            gid: req.gid(),
            pid: req.pid(),
        }
    }

    fn handler_request(&self) -> HandlerRequest {
        HandlerRequest {
            id: self.unique,
            pid: self.pid,
            uid: self.uid,
            gid: self.gid,
            ..Default::default()
        }
    }
}

enum Handle {
    File { node: Arc<IoNode> },
    Dir { node: Arc<IoNode> },
}

impl Handle {
    fn node(&self) -> &Arc<IoNode> {
        match self {
            Handle::File { node } => node,
            Handle::Dir { node } => node,
        }
    }
}

/// Handles inode allocation and the async execution of all requests.
struct Filesystem {
    service: Arc<HandlerService>,
    opts: Config,
    next_inode: AtomicU64,
    next_handle: AtomicU64,
    inodes: DashMap<u64, Arc<IoNode>>,
    paths: DashMap<String, u64>,
    handles: DashMap<u64, Handle>,
}

/// Extract the ok value from a result, or reply with an error in FUSE
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, err),
        }
    }};
}

/// Reply with an error to FUSE and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err = $err;
        tracing::debug!("{err:?}");
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        $reply.error(errno);
        return;
    }};
}

impl Filesystem {
    fn new(service: Arc<HandlerService>, opts: Config) -> Self {
        let fs = Self {
            service,
            opts,
            // the root inode must be 1, which is allocated just below
            next_inode: AtomicU64::new(ROOT_INODE),
            next_handle: AtomicU64::new(1),
            inodes: Default::default(),
            paths: Default::default(),
            handles: Default::default(),
        };
        let root = fs.opts.root.clone();
        fs.intern(&root);
        fs
    }

    /// The stable inode of the given path, allocating one on first use.
    fn intern(&self, path: &str) -> (u64, Arc<IoNode>) {
        if let Some(ino) = self.paths.get(path) {
            let ino = *ino.value();
            if let Some(node) = self.inodes.get(&ino) {
                return (ino, Arc::clone(node.value()));
            }
        }
        let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(IoNode::new(path));
        self.inodes.insert(ino, Arc::clone(&node));
        self.paths.insert(path.to_string(), ino);
        (ino, node)
    }

    fn node_of(&self, ino: u64) -> Option<Arc<IoNode>> {
        self.inodes.get(&ino).map(|node| Arc::clone(node.value()))
    }

    fn allocate_handle(&self, handle: Handle) -> u64 {
        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, handle);
        fh
    }

    fn attr_from_info(&self, ino: u64, info: &FileInfo) -> FileAttr {
        let kind = if info.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let size = info.size.max(0) as u64;
        let mtime = if info.mtime_secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(info.mtime_secs as u64)
        } else {
            UNIX_EPOCH
        };
        FileAttr {
            ino,
            size,
            blocks: size / BLOCK_SIZE as u64 + 1,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: (info.mode & 0o7777) as u16,
            nlink: if info.is_dir { 2 } else { 1 },
            uid: info.uid,
            gid: info.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn root_attr(&self) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino: ROOT_INODE,
            size: 0,
            blocks: 1,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o555,
            nlink: 2,
            uid: self.opts.uid.as_raw(),
            gid: self.opts.gid.as_raw(),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// List a directory: what the responsible handler reports, or the
    /// registered prefixes below it when no handler covers the
    /// directory itself (the export root, typically).
    async fn list_dir(
        &self,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> vpfs::Result<Vec<(String, FileType)>> {
        let path = node.path_str();
        if self.service.find(path).is_some() {
            let entries = self.service.read_dir_all(path, req).await?;
            return Ok(entries
                .into_iter()
                .map(|info| {
                    let kind = if info.is_dir {
                        FileType::Directory
                    } else {
                        FileType::RegularFile
                    };
                    (info.name, kind)
                })
                .collect());
        }
        Ok(self
            .service
            .children_of(path)
            .into_iter()
            .map(|name| {
                let child = format!("{}/{name}", path.trim_end_matches('/'));
                let kind = if self.service.children_of(&child).is_empty() {
                    FileType::RegularFile
                } else {
                    FileType::Directory
                };
                (name, kind)
            })
            .collect())
    }
}

// these functions mirror the actual fuse ones and
// so we don't have much control over the shape
impl Filesystem {
    async fn lookup(&self, info: RequestInfo, parent: u64, name: OsString, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent) = self.node_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };

        let path = format!("{}/{name}", parent.path_str().trim_end_matches('/'));
        tracing::trace!(id = info.unique, %path, "lookup");

        let file_info = unwrap!(reply, self.service.lookup(&path, &info.handler_request()).await);
        let (ino, _) = self.intern(&path);
        let attr = self.attr_from_info(ino, &file_info);
        reply.entry(&self.opts.ttl, &attr, 0);
    }

    async fn getattr(&self, info: RequestInfo, ino: u64, reply: ReplyAttr) {
        if ino == ROOT_INODE {
            reply.attr(&self.opts.ttl, &self.root_attr());
            return;
        }
        let Some(node) = self.node_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        tracing::trace!(id = info.unique, path = node.path_str(), "getattr");
        let file_info = unwrap!(
            reply,
            self.service
                .getattr(node.path_str(), &info.handler_request())
                .await
        );
        let attr = self.attr_from_info(ino, &file_info);
        reply.attr(&self.opts.ttl, &attr);
    }

    async fn open(&self, info: RequestInfo, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(node) = self.node_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        tracing::trace!(id = info.unique, path = node.path_str(), flags, "open");
        let mut req = info.handler_request();
        req.flags = flags;
        unwrap!(reply, self.service.open(node.path_str(), &req).await);

        let fh = self.allocate_handle(Handle::File { node });
        reply.opened(fh, 0);
    }

    async fn release(&self, info: RequestInfo, fh: u64, reply: ReplyEmpty) {
        let Some((_, handle)) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        // handlers keep no state across open/read/close; closing only
        // retires the handle
        let _ = self
            .service
            .close(handle.node().path_str(), &info.handler_request())
            .await;
        reply.ok();
    }

    async fn read(
        &self,
        info: RequestInfo,
        fh: u64,
        offset: i64,
        size: u32,
        reply: ReplyData,
    ) {
        let Some(node) = self.handles.get(&fh).map(|h| Arc::clone(h.value().node())) else {
            reply.error(libc::EBADF);
            return;
        };

        tracing::trace!(id = info.unique, path = node.path_str(), offset, size, "read");
        let mut req = info.handler_request();
        req.offset = offset;
        req.size = size;

        let data = unwrap!(reply, self.service.read(node.path_str(), &req).await);
        let end = data.len().min(size as usize);
        reply.data(&data[..end]);
    }

    async fn write(
        &self,
        info: RequestInfo,
        fh: u64,
        offset: i64,
        data: Vec<u8>,
        reply: ReplyWrite,
    ) {
        let Some(node) = self.handles.get(&fh).map(|h| Arc::clone(h.value().node())) else {
            reply.error(libc::EBADF);
            return;
        };

        tracing::trace!(
            id = info.unique,
            path = node.path_str(),
            offset,
            len = data.len(),
            "write"
        );
        let mut req = info.handler_request();
        req.offset = offset;
        req.data = data;

        let written = unwrap!(reply, self.service.write(node.path_str(), &req).await);
        reply.written(written as u32);
    }

    async fn opendir(&self, info: RequestInfo, ino: u64, reply: ReplyOpen) {
        let Some(node) = self.node_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        tracing::trace!(id = info.unique, path = node.path_str(), "opendir");
        let fh = self.allocate_handle(Handle::Dir { node });
        reply.opened(fh, 0);
    }

    async fn readdir(&self, info: RequestInfo, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(node) = self.handles.get(&fh).map(|h| Arc::clone(h.value().node())) else {
            reply.error(libc::EBADF);
            return;
        };

        tracing::trace!(id = info.unique, path = node.path_str(), offset, "readdir");
        let entries = unwrap!(
            reply,
            self.list_dir(&node, &info.handler_request()).await
        );

        for (index, (name, kind)) in entries.iter().enumerate().skip(offset as usize) {
            let child = format!("{}/{name}", node.path_str().trim_end_matches('/'));
            let (ino, _) = self.intern(&child);
            if reply.add(ino, (index + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    async fn releasedir(&self, _info: RequestInfo, fh: u64, reply: ReplyEmpty) {
        let Some((_, _handle)) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        reply.ok();
    }
}

/// Represents a connected FUSE session.
///
/// This implements the [`fuser::Filesystem`] trait, receives all
/// requests and arranges for their async execution against the
/// handler registry.
pub struct Session {
    inner: Arc<Filesystem>,
}

impl Session {
    pub fn new(service: Arc<HandlerService>, opts: Config) -> Self {
        Self {
            inner: Arc::new(Filesystem::new(service, opts)),
        }
    }

    /// The mount options this session was configured with.
    pub fn mount_options(&self) -> Vec<MountOption> {
        self.inner.opts.mount_options.iter().cloned().collect()
    }
}

impl fuser::Filesystem for Session {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let info = RequestInfo::of(req);
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.lookup(info, parent, name, reply).await });
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.getattr(info, ino, reply).await });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.open(info, ino, flags, reply).await });
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.release(info, fh, reply).await });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.read(info, fh, offset, size, reply).await });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let info = RequestInfo::of(req);
        let data = data.to_vec();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.write(info, fh, offset, data, reply).await });
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.opendir(info, ino, reply).await });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.readdir(info, fh, offset, reply).await });
    }

    fn releasedir(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        let info = RequestInfo::of(req);
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.releasedir(info, fh, reply).await });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
    }
}
