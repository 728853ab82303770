// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Multi-stream file download: one remote file is split into contiguous
//! byte ranges, one per worker, and every worker copies its range into the
//! shared destination file at the matching offset. Interrupted workers pick
//! up from their sidecar checkpoint on the next run.

use crate::remote::RemoteFs;
use crate::transfer::{progress, FetchOptions, TransferError, CHUNK_SIZE};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;

/// Splits `size` bytes across `workers` contiguous `[start, stop)` ranges.
///
/// Worker *i* (1-indexed) owns `[floor(size·(i-1)/N), floor(size·i/N))`,
/// with the first range pinned to 0 and the last to `size`. Resumed
/// downloads recompute these ranges, so the rounding must stay put.
pub fn partition(size: u64, workers: u32) -> Vec<(u64, u64)> {
    let workers = workers.max(1);
    let mut ranges = Vec::with_capacity(workers as usize);
    for i in 1..=u64::from(workers) {
        let start = if i == 1 {
            0
        } else {
            (u128::from(size) * u128::from(i - 1) / u128::from(workers)) as u64
        };
        let stop = if i == u64::from(workers) {
            size
        } else {
            (u128::from(size) * u128::from(i) / u128::from(workers)) as u64
        };
        ranges.push((start, stop));
    }
    ranges
}

/// Copies the remote file at `remote_path` into `dest` using
/// `opts.workers` parallel range readers.
///
/// The sidecar is removed only when every worker succeeds; any failure
/// leaves it behind so the next attempt resumes.
pub async fn fetch_file(
    remote: &Arc<dyn RemoteFs>,
    remote_path: &str,
    dest: &Path,
    opts: FetchOptions,
) -> Result<(), TransferError> {
    let stat = remote.stat(remote_path).await?;
    let ranges = partition(stat.size, opts.workers);

    let mut workers = JoinSet::new();
    for (idx, (start, stop)) in ranges.into_iter().enumerate() {
        let range = WorkerRange {
            remote: Arc::clone(remote),
            remote_path: remote_path.to_string(),
            dest: dest.to_path_buf(),
            worker: idx as u32 + 1,
            partition_start: start,
            stop,
            resume: opts.resume,
            file_mode: opts.file_mode,
        };
        workers.spawn(range.run());
    }

    let mut first_err = None;
    while let Some(joined) = workers.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => Err(TransferError::WorkerPanic(err.to_string())),
        };
        if let Err(err) = outcome {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    if opts.resume {
        progress::destroy(dest).await?;
    }
    Ok(())
}

struct WorkerRange {
    remote: Arc<dyn RemoteFs>,
    remote_path: String,
    dest: PathBuf,
    worker: u32,
    partition_start: u64,
    stop: u64,
    resume: bool,
    file_mode: u32,
}

impl WorkerRange {
    async fn run(self) -> Result<(), TransferError> {
        let mut start = self.partition_start;
        if self.resume {
            if let Some(saved) = progress::read(&self.dest, self.worker).await? {
                start = saved;
            }
        }

        let mut source = self.remote.open_read(&self.remote_path).await?;
        source.seek_to(start).await?;

        let mut open_opts = OpenOptions::new();
        open_opts.write(true).create(true).truncate(false);
        #[cfg(unix)]
        open_opts.mode(self.file_mode);
        let mut dest_file = open_opts.open(&self.dest).await?;
        dest_file.seek(SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let mut offset = start;
        while offset < self.stop {
            // Checkpoint before the read: everything below `offset` has
            // already been issued to the destination.
            if self.resume {
                progress::write(&self.dest, offset, self.worker).await?;
            }

            let want = (self.stop - offset).min(CHUNK_SIZE) as usize;
            let read = source.read_chunk(&mut buf[..want]).await?;
            if read == 0 {
                return Err(TransferError::PrematureEof {
                    path: self.remote_path.clone(),
                    offset,
                    stop: self.stop,
                });
            }

            dest_file.write_all(&buf[..read]).await?;
            offset += read as u64;
        }

        dest_file.flush().await?;
        if self.resume {
            progress::write(&self.dest, offset, self.worker).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::local::LocalRemote;
    use crate::remote::{RemoteError, RemoteRead, RemoteStat};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fetcher_test_{}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pattern_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7) % 251) as u8).collect()
    }

    fn opts(workers: u32, resume: bool) -> FetchOptions {
        FetchOptions {
            workers,
            resume,
            file_mode: 0o644,
        }
    }

    #[test]
    fn test_partition_covers_size_exactly() {
        for &size in &[0u64, 1, 5, 1024, 1_048_576, 7_777_777] {
            for workers in 1..=8u32 {
                let ranges = partition(size, workers);
                assert_eq!(ranges.len(), workers as usize);
                assert_eq!(ranges[0].0, 0, "start_1 must be 0");
                assert_eq!(
                    ranges.last().unwrap().1,
                    size,
                    "stop_N must be the full size"
                );
                for pair in ranges.windows(2) {
                    assert_eq!(
                        pair[0].1, pair[1].0,
                        "ranges must be contiguous for size={} workers={}",
                        size, workers
                    );
                }
                for (start, stop) in &ranges {
                    assert!(start <= stop);
                }
            }
        }
    }

    #[test]
    fn test_partition_matches_integer_division() {
        // 1 MiB over 4 workers lands on exact 256 KiB boundaries.
        let ranges = partition(1_048_576, 4);
        assert_eq!(
            ranges,
            vec![
                (0, 262_144),
                (262_144, 524_288),
                (524_288, 786_432),
                (786_432, 1_048_576),
            ]
        );

        // Uneven split: floor arithmetic, remainder drifts to the tail.
        let ranges = partition(10, 3);
        assert_eq!(ranges, vec![(0, 3), (3, 6), (6, 10)]);
    }

    #[tokio::test]
    async fn test_fetch_copies_bytes_and_removes_sidecar() {
        let dir = scratch_dir();
        let remote_root = dir.join("remote");
        std::fs::create_dir_all(&remote_root).unwrap();
        let source = pattern_bytes(1_000_003);
        std::fs::write(remote_root.join("payload.bin"), &source).unwrap();

        let remote: Arc<dyn RemoteFs> = Arc::new(LocalRemote::new(remote_root));
        let dest = dir.join("payload.bin");
        fetch_file(&remote, "/payload.bin", &dest, opts(4, true))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), source);
        assert!(
            !progress::sidecar_path(&dest).exists(),
            "sidecar must be destroyed on success"
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_fetch_empty_file() {
        let dir = scratch_dir();
        let remote_root = dir.join("remote");
        std::fs::create_dir_all(&remote_root).unwrap();
        std::fs::write(remote_root.join("empty.bin"), b"").unwrap();

        let remote: Arc<dyn RemoteFs> = Arc::new(LocalRemote::new(remote_root));
        let dest = dir.join("empty.bin");
        fetch_file(&remote, "/empty.bin", &dest, opts(4, true))
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
        assert!(!progress::sidecar_path(&dest).exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    /// Wraps the local fake and records every seek offset so tests can see
    /// where each worker actually started reading.
    struct RecordingRemote {
        inner: LocalRemote,
        seeks: Arc<Mutex<Vec<u64>>>,
    }

    struct RecordingRead {
        inner: Box<dyn RemoteRead>,
        seeks: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl RemoteRead for RecordingRead {
        async fn seek_to(&mut self, offset: u64) -> Result<(), RemoteError> {
            self.seeks.lock().unwrap().push(offset);
            self.inner.seek_to(offset).await
        }

        async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
            self.inner.read_chunk(buf).await
        }
    }

    #[async_trait]
    impl RemoteFs for RecordingRemote {
        async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
            self.inner.stat(path).await
        }

        async fn walk(&self, path: &str) -> Result<Vec<crate::remote::RemoteEntry>, RemoteError> {
            self.inner.walk(path).await
        }

        async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteRead>, RemoteError> {
            Ok(Box::new(RecordingRead {
                inner: self.inner.open_read(path).await?,
                seeks: Arc::clone(&self.seeks),
            }))
        }

        async fn close(&self) -> Result<(), RemoteError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_resume_continues_from_checkpoints() {
        let dir = scratch_dir();
        let remote_root = dir.join("remote");
        std::fs::create_dir_all(&remote_root).unwrap();
        let size = 2_000_000usize;
        let source = pattern_bytes(size);
        std::fs::write(remote_root.join("payload.bin"), &source).unwrap();

        // Fake an interrupted run: each worker wrote part of its range and
        // checkpointed, then the process died.
        let dest = dir.join("payload.bin");
        let ranges = partition(size as u64, 4);
        let mut partial = vec![0u8; size];
        let mut saved_offsets = Vec::new();
        for (idx, (start, stop)) in ranges.iter().enumerate() {
            let saved = start + (stop - start) / 3;
            partial[*start as usize..saved as usize]
                .copy_from_slice(&source[*start as usize..saved as usize]);
            progress::write(&dest, saved, idx as u32 + 1).await.unwrap();
            saved_offsets.push(saved);
        }
        std::fs::write(&dest, &partial).unwrap();

        let seeks = Arc::new(Mutex::new(Vec::new()));
        let remote: Arc<dyn RemoteFs> = Arc::new(RecordingRemote {
            inner: LocalRemote::new(remote_root),
            seeks: Arc::clone(&seeks),
        });
        fetch_file(&remote, "/payload.bin", &dest, opts(4, true))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), source);
        assert!(!progress::sidecar_path(&dest).exists());

        // Every worker resumed from its checkpoint rather than its
        // partition start.
        let mut seen = seeks.lock().unwrap().clone();
        seen.sort_unstable();
        saved_offsets.sort_unstable();
        assert_eq!(seen, saved_offsets);

        let _ = std::fs::remove_dir_all(dir);
    }

    /// Reports a larger size than the file holds so reads hit end-of-file
    /// before the partition boundary.
    struct OversizedRemote {
        inner: LocalRemote,
        reported: u64,
    }

    #[async_trait]
    impl RemoteFs for OversizedRemote {
        async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
            let stat = self.inner.stat(path).await?;
            Ok(RemoteStat {
                size: self.reported,
                ..stat
            })
        }

        async fn walk(&self, path: &str) -> Result<Vec<crate::remote::RemoteEntry>, RemoteError> {
            self.inner.walk(path).await
        }

        async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteRead>, RemoteError> {
            self.inner.open_read(path).await
        }

        async fn close(&self) -> Result<(), RemoteError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_premature_eof_fails_and_keeps_sidecar() {
        let dir = scratch_dir();
        let remote_root = dir.join("remote");
        std::fs::create_dir_all(&remote_root).unwrap();
        std::fs::write(remote_root.join("short.bin"), pattern_bytes(10_000)).unwrap();

        let remote: Arc<dyn RemoteFs> = Arc::new(OversizedRemote {
            inner: LocalRemote::new(remote_root),
            reported: 50_000,
        });
        let dest = dir.join("short.bin");
        let err = fetch_file(&remote, "/short.bin", &dest, opts(2, true))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::PrematureEof { .. }));
        assert!(
            progress::sidecar_path(&dest).exists(),
            "failed download must leave the sidecar for resumption"
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
