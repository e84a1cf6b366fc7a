// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! `/proc/meminfo` handler.
//!
//! Serves the caller its own container's view of memory accounting
//! rather than the host's.

use async_trait::async_trait;

use super::{Handler, HandlerRequest, HandlerService, IoNode};
use crate::message::FileInfo;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ProcMeminfo {}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for ProcMeminfo {
    fn name(&self) -> &'static str {
        "ProcMeminfo"
    }

    fn prefix(&self) -> &'static str {
        "/proc/meminfo"
    }

    async fn lookup(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo> {
        tracing::debug!(id = req.id, "ProcMeminfo lookup");
        svc.ns_lookup(req, node.path_str()).await
    }

    async fn open(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<()> {
        tracing::debug!(id = req.id, "ProcMeminfo open");
        Ok(())
    }

    async fn read(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>> {
        tracing::debug!(id = req.id, "ProcMeminfo read");
        if req.offset > 0 {
            return Ok(Vec::new());
        }
        let content = svc.ns_read_file(req, node.path_str()).await?;
        Ok(format!("{content}\n").into_bytes())
    }

    async fn write(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        _req: &HandlerRequest,
    ) -> Result<usize> {
        Err(Error::new_errno(libc::EACCES, "meminfo is read-only"))
    }

    async fn read_dir_all(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        _req: &HandlerRequest,
    ) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }
}
