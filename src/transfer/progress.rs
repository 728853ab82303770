// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! On-disk download checkpoints. Every destination file may carry a hidden
//! sidecar holding one big-endian `i64` slot per worker; slot *i* records
//! the last offset worker *i* flushed. Worker numbers are 1-indexed.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const SLOT_SIZE: u64 = 8;

/// Sidecar path for a destination: `.{basename}.progress` in the same
/// directory.
pub fn sidecar_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = dest.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!(".{}.progress", name))
}

fn slot_offset(worker: u32) -> u64 {
    debug_assert!(worker >= 1, "worker numbers are 1-indexed");
    SLOT_SIZE * u64::from(worker - 1)
}

/// Reads worker `worker`'s saved offset. A missing sidecar, an empty one,
/// or a slot that was never fully written all mean no progress.
pub async fn read(dest: &Path, worker: u32) -> std::io::Result<Option<u64>> {
    let mut file = match File::open(sidecar_path(dest)).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    if file.metadata().await?.len() == 0 {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(slot_offset(worker))).await?;

    let mut buf = [0u8; SLOT_SIZE as usize];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled < buf.len() {
        return Ok(None);
    }

    let value = i64::from_be_bytes(buf);
    if value < 0 {
        return Ok(None);
    }
    Ok(Some(value as u64))
}

/// Records worker `worker`'s offset. Creates the sidecar on first use.
/// Slots are disjoint byte ranges, so concurrent callers writing different
/// slots never step on each other.
pub async fn write(dest: &Path, offset: u64, worker: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(sidecar_path(dest))
        .await?;

    file.seek(SeekFrom::Start(slot_offset(worker))).await?;
    file.write_all(&(offset as i64).to_be_bytes()).await?;
    file.flush().await
}

/// Removes the sidecar. A missing sidecar is not an error.
pub async fn destroy(dest: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(sidecar_path(dest)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("progress_test_{}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/dest/payload.bin")),
            PathBuf::from("/dest/.payload.bin.progress")
        );
    }

    #[tokio::test]
    async fn test_absent_sidecar_means_no_progress() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");

        assert_eq!(read(&dest, 1).await.unwrap(), None);
        assert_eq!(read(&dest, 4).await.unwrap(), None);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_empty_sidecar_means_no_progress() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");
        std::fs::write(sidecar_path(&dest), b"").unwrap();

        assert_eq!(read(&dest, 1).await.unwrap(), None);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_short_slot_means_no_progress() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");
        // Only worker 1's slot exists on disk; worker 2's read comes up short.
        write(&dest, 123, 1).await.unwrap();

        assert_eq!(read(&dest, 1).await.unwrap(), Some(123));
        assert_eq!(read(&dest, 2).await.unwrap(), None);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");

        write(&dest, 1000, 2).await.unwrap();
        write(&dest, 500, 1).await.unwrap();
        write(&dest, 9_999_999_999, 3).await.unwrap();

        assert_eq!(read(&dest, 1).await.unwrap(), Some(500));
        assert_eq!(read(&dest, 2).await.unwrap(), Some(1000));
        assert_eq!(read(&dest, 3).await.unwrap(), Some(9_999_999_999));

        // Rewriting one slot leaves the others alone.
        write(&dest, 750, 2).await.unwrap();
        assert_eq!(read(&dest, 1).await.unwrap(), Some(500));
        assert_eq!(read(&dest, 2).await.unwrap(), Some(750));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_distinct_slots() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");

        let mut handles = Vec::new();
        for worker in 1..=8u32 {
            let dest = dest.clone();
            handles.push(tokio::spawn(async move {
                for step in 0..32u64 {
                    write(&dest, u64::from(worker) * 1000 + step, worker)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for worker in 1..=8u32 {
            assert_eq!(
                read(&dest, worker).await.unwrap(),
                Some(u64::from(worker) * 1000 + 31)
            );
        }

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let dir = scratch_dir();
        let dest = dir.join("payload.bin");

        destroy(&dest).await.unwrap();

        write(&dest, 42, 1).await.unwrap();
        assert!(sidecar_path(&dest).exists());
        destroy(&dest).await.unwrap();
        assert!(!sidecar_path(&dest).exists());
        destroy(&dest).await.unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }
}
