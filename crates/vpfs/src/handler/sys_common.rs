// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! The generic `/proc/sys` handler.
//!
//! Everything under `/proc/sys` that no more specific handler emulates
//! is answered by passing the operation through to the caller's own
//! container view. More specific handlers also delegate here for the
//! leaves they do not emulate, which is what layers the emulation.

use async_trait::async_trait;

use super::{Handler, HandlerRequest, HandlerService, IoNode};
use crate::message::FileInfo;
use crate::Result;

#[derive(Debug, Default)]
pub struct ProcSysCommon {}

impl ProcSysCommon {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for ProcSysCommon {
    fn name(&self) -> &'static str {
        "ProcSysCommon"
    }

    fn prefix(&self) -> &'static str {
        "/proc/sys"
    }

    async fn lookup(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysCommon lookup");
        svc.ns_lookup(req, node.path_str()).await
    }

    async fn open(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<()> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysCommon open");
        svc.ns_open(req, node.path_str(), req.flags, 0).await
    }

    async fn read(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysCommon read");
        if req.offset > 0 {
            return Ok(Vec::new());
        }
        let content = svc.ns_read_file(req, node.path_str()).await?;
        Ok(format!("{content}\n").into_bytes())
    }

    async fn write(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<usize> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysCommon write");
        let content = String::from_utf8_lossy(&req.data);
        svc.ns_write_file(req, node.path_str(), content.trim()).await?;
        Ok(req.data.len())
    }

    async fn read_dir_all(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<FileInfo>> {
        tracing::debug!(id = req.id, path = node.path_str(), "ProcSysCommon readdir");
        svc.ns_read_dir(req, node.path_str()).await
    }
}
