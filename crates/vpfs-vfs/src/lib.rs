// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! FUSE session binding for the vpfs daemon.
//!
//! This crate accepts kernel filesystem requests and routes each one
//! into the handler layer of the [`vpfs`] crate, which answers either
//! locally or from inside the caller's container.

mod fuse;

pub use fuse::{Config, Session};
