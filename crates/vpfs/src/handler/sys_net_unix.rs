// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! `/proc/sys/net/unix` handler.
//!
//! Emulated resources:
//!
//! * `/proc/sys/net/unix/max_dgram_qlen`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    synthetic_file_info,
    EmuResource,
    Handler,
    HandlerRequest,
    HandlerService,
    IoNode,
};
use crate::message::FileInfo;
use crate::{Error, Result};

const PARENT: &str = "/proc/sys";
const MAX_DGRAM_QLEN: &str = "max_dgram_qlen";

pub struct ProcSysNetUnix {
    resources: HashMap<&'static str, Arc<EmuResource>>,
}

impl Default for ProcSysNetUnix {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcSysNetUnix {
    pub fn new() -> Self {
        let mut resources = HashMap::new();
        resources.insert(MAX_DGRAM_QLEN, EmuResource::file(0o644));
        Self { resources }
    }

    fn parent(&self, svc: &HandlerService) -> Result<Arc<dyn Handler>> {
        svc.find_exact(PARENT)
            .ok_or_else(|| Error::UnknownHandler(PARENT.to_string()))
    }

    /// Read an integer-valued resource from the container's kernel view.
    async fn read_file_int(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>> {
        let content = svc.ns_read_file(req, node.path_str()).await?;
        Ok(format!("{content}\n").into_bytes())
    }

    /// Write an integer-valued resource, refusing values above the
    /// running maximum. The whole read-check-write sequence holds the
    /// resource lock so concurrent writers cannot interleave.
    async fn write_file_max_int(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
        resource: &EmuResource,
    ) -> Result<usize> {
        let wanted: i64 = String::from_utf8_lossy(&req.data)
            .trim()
            .parse()
            .map_err(|_| Error::new_errno(libc::EINVAL, "not an integer"))?;

        let mut state = resource.lock().await;

        let current: i64 = svc
            .ns_read_file(req, node.path_str())
            .await?
            .parse()
            .map_err(|_| Error::new_errno(libc::EINVAL, "unparsable current value"))?;
        let max = *state.max_seen.get_or_insert(current);
        if wanted > max {
            return Err(Error::new_errno(
                libc::EINVAL,
                format!("value {wanted} exceeds allowed maximum {max}"),
            ));
        }

        svc.ns_write_file(req, node.path_str(), &wanted.to_string())
            .await?;
        Ok(req.data.len())
    }
}

#[async_trait]
impl Handler for ProcSysNetUnix {
    fn name(&self) -> &'static str {
        "ProcSysNetUnix"
    }

    fn prefix(&self) -> &'static str {
        "/proc/sys/net/unix"
    }

    fn resource(&self, name: &str) -> Option<Arc<EmuResource>> {
        self.resources.get(name).map(Arc::clone)
    }

    async fn lookup(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysNetUnix lookup");

        if let Some(resource) = self.resource(node.name()) {
            let container = svc.container_of(req)?;
            return Ok(synthetic_file_info(node.name(), &resource, &container));
        }

        self.parent(svc)?.lookup(svc, node, req).await
    }

    async fn open(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<()> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysNetUnix open");

        if self.resource(node.name()).is_some() {
            return Ok(());
        }
        self.parent(svc)?.open(svc, node, req).await
    }

    async fn read(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysNetUnix read");

        // single-value files; anything past the first read is EOF
        if req.offset > 0 {
            return Ok(Vec::new());
        }

        match node.name() {
            MAX_DGRAM_QLEN => self.read_file_int(svc, node, req).await,
            _ => self.parent(svc)?.read(svc, node, req).await,
        }
    }

    async fn write(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<usize> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysNetUnix write");

        match self.resource(node.name()) {
            Some(resource) if node.name() == MAX_DGRAM_QLEN => {
                self.write_file_max_int(svc, node, req, &resource).await
            }
            _ => self.parent(svc)?.write(svc, node, req).await,
        }
    }

    async fn read_dir_all(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<FileInfo>> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysNetUnix readdir");
        self.parent(svc)?.read_dir_all(svc, node, req).await
    }
}
