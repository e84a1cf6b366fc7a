// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

//! Per-container virtualization of kernel pseudo-filesystems.
//!
//! vpfs presents processes inside a system container with a view of
//! `/proc` and `/proc/sys` that reflects the container's own namespaced
//! state rather than the host's. The daemon itself lives on the host,
//! outside every container namespace; whenever a request needs the
//! container's kernel view it spawns a short-lived helper chain that
//! enters the target namespaces, performs exactly one operation, and
//! reports back over a dedicated socket pair.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
mod error;
pub mod handler;
pub mod message;
pub mod mountinfo;
pub mod nstype;
pub mod nsx;
pub mod process;
pub mod state;

// re-exported to make downstream implementations easier
pub use async_trait::async_trait;

pub use self::config::{get_config, load_config, Config};
pub use error::{Error, Result};
pub use message::Message;
pub use nstype::NsType;
