// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod sftp;

#[cfg(test)]
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh error: {0}")]
    Ssh(String),
    #[error("sftp error: {0}")]
    Sftp(String),
    #[error("missing password or key for SSH authentication")]
    MissingAuth,
    #[error("SSH authentication rejected for user '{0}'")]
    AuthRejected(String),
    #[error("timed out connecting to '{0}'")]
    ConnectTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub path: String,
    pub stat: RemoteStat,
}

/// One independent reader over a remote file. A session hands out any number
/// of these; concurrent readers never share an offset.
#[async_trait]
pub trait RemoteRead: Send {
    async fn seek_to(&mut self, offset: u64) -> Result<(), RemoteError>;

    /// Reads up to `buf.len()` bytes. Zero means end-of-file.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError>;
}

/// The download-side surface of one SFTP session.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Depth-first listing rooted at `path`; the root entry comes first and
    /// every directory precedes its contents.
    async fn walk(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteRead>, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Opens sessions on demand so the scheduler can drop an idle session and
/// reconnect lazily on the next dispatch.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, RemoteError>;
}

/// Final component of a `/`-separated remote path.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent of a `/`-separated remote path, `/` for the root itself.
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

/// Joins `/`-separated remote path components.
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{}", child.trim_start_matches('/'))
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}
