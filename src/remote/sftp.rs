// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! SFTP-backed implementation of the remote contracts. One SSH connection
//! carries one SFTP subsystem channel; the session hands out independent
//! file handles, so byte-range workers can read concurrently.

use crate::config::SshConfig;
use crate::remote::{
    self, RemoteConnector, RemoteEntry, RemoteError, RemoteFs, RemoteRead, RemoteStat,
};
use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

fn ssh_err(err: russh::Error) -> RemoteError {
    RemoteError::Ssh(err.to_string())
}

fn sftp_err(err: russh_sftp::client::error::Error) -> RemoteError {
    RemoteError::Sftp(err.to_string())
}

fn stat_from(attrs: &FileAttributes) -> RemoteStat {
    RemoteStat {
        size: attrs.size.unwrap_or(0),
        is_dir: attrs.is_dir(),
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key pinning is left to the operator's ssh setup.
        Ok(true)
    }
}

/// Dials a fresh SSH + SFTP session per `connect` call using the
/// configured credentials.
pub struct SftpConnector {
    ssh: SshConfig,
}

impl SftpConnector {
    pub fn new(ssh: SshConfig) -> Self {
        Self { ssh }
    }
}

#[async_trait]
impl RemoteConnector for SftpConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, RemoteError> {
        Ok(Arc::new(SftpRemote::connect(&self.ssh).await?))
    }
}

pub struct SftpRemote {
    handle: client::Handle<ClientHandler>,
    sftp: SftpSession,
}

impl SftpRemote {
    async fn connect(ssh: &SshConfig) -> Result<Self, RemoteError> {
        if ssh.privkey_path.is_empty() && ssh.password.is_empty() {
            return Err(RemoteError::MissingAuth);
        }

        let config = Arc::new(client::Config::default());
        let dial = client::connect(config, ssh.addr.as_str(), ClientHandler);
        let mut handle = if ssh.timeout() > Duration::ZERO {
            tokio::time::timeout(ssh.timeout(), dial)
                .await
                .map_err(|_| RemoteError::ConnectTimeout(ssh.addr.clone()))?
        } else {
            dial.await
        }
        .map_err(ssh_err)?;

        let mut authenticated = false;
        if !ssh.privkey_path.is_empty() {
            let key = russh_keys::load_secret_key(&ssh.privkey_path, None)
                .map_err(|err| RemoteError::Ssh(err.to_string()))?;
            authenticated = handle
                .authenticate_publickey(&ssh.username, Arc::new(key))
                .await
                .map_err(ssh_err)?;
        }
        if !authenticated && !ssh.password.is_empty() {
            authenticated = handle
                .authenticate_password(&ssh.username, &ssh.password)
                .await
                .map_err(ssh_err)?;
        }
        if !authenticated {
            return Err(RemoteError::AuthRejected(ssh.username.clone()));
        }

        let channel = handle.channel_open_session().await.map_err(ssh_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(ssh_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(sftp_err)?;

        Ok(Self { handle, sftp })
    }
}

#[async_trait]
impl RemoteFs for SftpRemote {
    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
        let attrs = self.sftp.metadata(path).await.map_err(sftp_err)?;
        Ok(stat_from(&attrs))
    }

    async fn walk(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut out = Vec::new();
        let mut pending = vec![path.trim_end_matches('/').to_string()];

        while let Some(current) = pending.pop() {
            let attrs = self.sftp.metadata(&current).await.map_err(sftp_err)?;
            let stat = stat_from(&attrs);
            out.push(RemoteEntry {
                path: current.clone(),
                stat,
            });

            if !stat.is_dir {
                continue;
            }

            let mut names = Vec::new();
            for entry in self.sftp.read_dir(&current).await.map_err(sftp_err)? {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                names.push(name);
            }
            // Reverse-sorted push so the stack pops children in name order.
            names.sort();
            for name in names.into_iter().rev() {
                pending.push(remote::join(&current, &name));
            }
        }

        Ok(out)
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteRead>, RemoteError> {
        let file = self
            .sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(sftp_err)?;
        Ok(Box::new(SftpRead { file }))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(ssh_err)
    }
}

struct SftpRead {
    file: russh_sftp::client::fs::File,
}

#[async_trait]
impl RemoteRead for SftpRead {
    async fn seek_to(&mut self, offset: u64) -> Result<(), RemoteError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
        Ok(self.file.read(buf).await?)
    }
}
