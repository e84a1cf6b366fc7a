// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

const DEFAULT_MOUNTPOINT: &str = "/var/lib/vpfs";

lazy_static! {
    static ref CONFIG: RwLock<Option<Arc<Config>>> = RwLock::new(None);
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Filesystem {
    /// Where the virtual filesystem is exported; the container
    /// runtime bind-mounts paths from under here into containers
    pub mountpoint: PathBuf,
    /// Allow processes other than the mounting user to access the
    /// filesystem (required when serving containers)
    pub allow_other: bool,
    /// How long the kernel may cache attributes and entries, in seconds
    pub cache_timeout_secs: u64,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::from(DEFAULT_MOUNTPOINT),
            allow_other: true,
            cache_timeout_secs: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NsExec {
    /// Upper bound on a single message crossing the helper transport
    pub max_frame_size: u32,
}

impl Default for NsExec {
    fn default() -> Self {
        Self {
            max_frame_size: crate::message::MAX_FRAME_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub filesystem: Filesystem,
    pub nsexec: NsExec,
}

impl Config {
    /// Get the current loaded config, loading it if needed
    pub fn current() -> Result<Arc<Self>> {
        get_config()
    }

    /// Load the config from disk, even if it's already been loaded before
    pub fn load() -> Result<Self> {
        load_config()
    }

    /// Make this config the current global one
    pub fn make_current(self) -> Result<Arc<Self>> {
        let mut lock = CONFIG.write().map_err(|err| {
            crate::Error::String(format!("Cannot load config, lock has been poisoned: {err:?}"))
        })?;
        Ok(lock.insert(Arc::new(self)).clone())
    }
}

/// Get the current vpfs config, fetching it from disk if needed.
pub fn get_config() -> Result<Arc<Config>> {
    {
        let lock = CONFIG.read().map_err(|err| {
            crate::Error::String(format!("Cannot load config, lock has been poisoned: {err:?}"))
        })?;
        if let Some(config) = &*lock {
            return Ok(Arc::clone(config));
        }
    }
    load_config()?.make_current()
}

/// Load the vpfs configuration from disk and the environment.
///
/// Settings are merged, in order of precedence:
/// - environment variables prefixed with `VPFS_`
/// - `~/.config/vpfs/vpfs.toml`
/// - `/etc/vpfs.toml`
pub fn load_config() -> Result<Config> {
    let user_config = std::env::var("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".config/vpfs/vpfs.toml"))
        .ok();

    let mut builder = config::Config::builder().add_source(
        config::File::new("/etc/vpfs.toml", config::FileFormat::Toml).required(false),
    );
    if let Some(path) = user_config.as_deref().and_then(|p| p.to_str()) {
        builder =
            builder.add_source(config::File::new(path, config::FileFormat::Toml).required(false));
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("VPFS").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
