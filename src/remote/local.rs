// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Local-filesystem stand-in for an SFTP session, used by transfer and
//! queue tests. Remote paths resolve beneath a root directory.

use super::{RemoteConnector, RemoteEntry, RemoteError, RemoteFs, RemoteRead, RemoteStat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

pub struct LocalRemote {
    root: PathBuf,
}

impl LocalRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

struct LocalRead {
    file: File,
}

#[async_trait]
impl RemoteRead for LocalRead {
    async fn seek_to(&mut self, offset: u64) -> Result<(), RemoteError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
        Ok(self.file.read(buf).await?)
    }
}

async fn stat_local(path: &Path) -> Result<RemoteStat, RemoteError> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(RemoteStat {
        size: meta.len(),
        is_dir: meta.is_dir(),
    })
}

#[async_trait]
impl RemoteFs for LocalRemote {
    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
        stat_local(&self.resolve(path)).await
    }

    async fn walk(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut out = Vec::new();
        let mut pending = vec![path.trim_end_matches('/').to_string()];

        while let Some(remote_path) = pending.pop() {
            let stat = stat_local(&self.resolve(&remote_path)).await?;
            out.push(RemoteEntry {
                path: remote_path.clone(),
                stat,
            });

            if !stat.is_dir {
                continue;
            }

            let mut names = Vec::new();
            let mut dir = tokio::fs::read_dir(self.resolve(&remote_path)).await?;
            while let Some(entry) = dir.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            // Reverse-sorted push so the stack pops children in name order.
            names.sort();
            for name in names.into_iter().rev() {
                pending.push(super::join(&remote_path, &name));
            }
        }

        Ok(out)
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteRead>, RemoteError> {
        let file = File::open(self.resolve(path)).await?;
        Ok(Box::new(LocalRead { file }))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteConnector for LocalConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, RemoteError> {
        Ok(Arc::new(LocalRemote::new(self.root.clone())))
    }
}
