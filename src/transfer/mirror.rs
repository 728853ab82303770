// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mirrors a remote file or directory tree beneath a local parent
//! directory, dispatching every remote file to the multi-stream fetcher.

use crate::remote::{self, RemoteFs};
use crate::transfer::fetcher::fetch_file;
use crate::transfer::{FetchOptions, TransferError};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Copies `remote_path` (file or directory) under `local_parent`.
///
/// The mirrored tree keeps the remote layout relative to `remote_path`'s
/// parent, so a directory `/seed/show` lands at `local_parent/show`. Local
/// paths whose kind disagrees with the remote (file vs directory) are
/// replaced; matching kinds are preserved so resumed downloads keep their
/// partial files.
pub async fn mirror(
    remote: &Arc<dyn RemoteFs>,
    remote_path: &str,
    local_parent: &Path,
    opts: FetchOptions,
) -> Result<(), TransferError> {
    let root = if remote_path.len() > 1 {
        remote_path.trim_end_matches('/')
    } else {
        remote_path
    };
    let stat = remote.stat(root).await?;

    if !stat.is_dir {
        let dest = local_parent.join(remote::base_name(root));
        replace_mismatched_kind(&dest, false).await?;
        return fetch_file(remote, root, &dest, opts).await;
    }

    let parent_prefix = remote::parent(root);
    for entry in remote.walk(root).await? {
        let local_path = local_parent.join(relative_to(parent_prefix, &entry.path));
        replace_mismatched_kind(&local_path, entry.stat.is_dir).await?;

        if entry.stat.is_dir {
            tokio::fs::create_dir_all(&local_path).await?;
            set_mode(&local_path, opts.file_mode).await?;
        } else {
            fetch_file(remote, &entry.path, &local_path, opts).await?;
        }
    }

    Ok(())
}

fn relative_to<'a>(parent: &str, path: &'a str) -> &'a str {
    path.strip_prefix(parent).unwrap_or(path).trim_start_matches('/')
}

async fn replace_mismatched_kind(path: &Path, remote_is_dir: bool) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            if meta.is_dir() && !remote_is_dir {
                tokio::fs::remove_dir_all(path).await?;
            } else if !meta.is_dir() && remote_is_dir {
                tokio::fs::remove_file(path).await?;
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
