// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! `/proc/swaps` handler.
//!
//! A container owns no swap devices, so its view is the header line and
//! nothing else.

use async_trait::async_trait;

use super::{Handler, HandlerRequest, HandlerService, IoNode};
use crate::message::FileInfo;
use crate::{Error, Result};

const SWAPS_HEADER: &str = "Filename\t\t\t\tType\t\tSize\tUsed\tPriority\n";

#[derive(Debug, Default)]
pub struct ProcSwaps {}

impl ProcSwaps {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for ProcSwaps {
    fn name(&self) -> &'static str {
        "ProcSwaps"
    }

    fn prefix(&self) -> &'static str {
        "/proc/swaps"
    }

    async fn lookup(
        &self,
        svc: &HandlerService,
        node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<FileInfo> {
        tracing::debug!(id = req.id, "ProcSwaps lookup");
        svc.ns_lookup(req, node.path_str()).await
    }

    async fn open(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<()> {
        tracing::debug!(id = req.id, "ProcSwaps open");
        Ok(())
    }

    async fn read(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        req: &HandlerRequest,
    ) -> Result<Vec<u8>> {
        tracing::debug!(id = req.id, "ProcSwaps read");
        if req.offset > 0 {
            return Ok(Vec::new());
        }
        Ok(SWAPS_HEADER.as_bytes().to_vec())
    }

    async fn write(
        &self,
        _svc: &HandlerService,
        _node: &IoNode,
        _req: &HandlerRequest,
    ) -> Result<usize> {
        Err(Error::new_errno(libc::EACCES, "swaps is read-only"))
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
