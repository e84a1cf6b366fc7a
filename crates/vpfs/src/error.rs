// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    String(String),
    #[error(transparent)]
    Nix(#[from] nix::errno::Errno),
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error("[ERRNO {1}] {0}")]
    Errno(String, i32),
    #[error(transparent)]
    JSON(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("helper process failed: {0}")]
    HelperProcess(String),
    #[error("no container registered for caller pid {0}")]
    UnknownContainer(u32),
    #[error("no handler registered for path {0}")]
    UnknownHandler(String),
    #[error("invalid message on nsexec transport: {0}")]
    Protocol(String),
}

impl Error {
    pub fn new<S: AsRef<str>>(message: S) -> Error {
        Error::new_errno(libc::EINVAL, message.as_ref())
    }

    pub fn new_errno<E: Into<String>>(errno: i32, e: E) -> Error {
        Error::Errno(e.into(), errno)
    }

    pub fn wrap_io<E: Into<String>>(err: std::io::Error, prefix: E) -> Error {
        Error::from(err).wrap(prefix)
    }

    pub fn wrap_nix<E: Into<String>>(err: nix::errno::Errno, prefix: E) -> Error {
        Error::from(err).wrap(prefix)
    }

    pub fn wrap<E: Into<String>>(&self, prefix: E) -> Error {
        let msg = format!("{}: {}", prefix.into(), self);
        match self.raw_os_error() {
            Some(errno) => Error::new_errno(errno, msg),
            None => Error::String(msg),
        }
    }

    /// The errno that best represents this error, if any.
    ///
    /// The filesystem layer uses this to answer the kernel; anything
    /// without a more specific value is reported as EIO there.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::IO(err) => err.raw_os_error(),
            Error::Errno(_, errno) => Some(*errno),
            Error::Nix(errno) => Some(*errno as i32),
            Error::UnknownContainer(_) => Some(libc::ENOENT),
            Error::UnknownHandler(_) => Some(libc::ENOENT),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::String(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::String(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
