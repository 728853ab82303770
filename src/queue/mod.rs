// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The scheduler: watches blackhole directories for metainfo files,
//! uploads unknown ones to rtorrent, polls the remote torrent list, and
//! pulls completed payloads down over SFTP with bounded parallelism.
//!
//! All queue state lives in this one task. Download tasks report back
//! through the completion channel instead of mutating shared maps.

pub mod registry;
pub mod rpc;
pub mod status;

use crate::config::Config;
use crate::integrations::disk::DiskUsage;
use crate::integrations::rtorrent::{RtorrentClient, TorrentInfo};
use crate::integrations::watcher::{self, WatchAction};
use crate::metainfo;
use crate::queue::registry::Registry;
use crate::queue::rpc::StatusRequest;
use crate::queue::status::DownloadInfo;
use crate::remote::{self, RemoteConnector, RemoteFs};
use crate::transfer::mirror::mirror;
use crate::transfer::{FetchOptions, TransferError};
use notify::{Error as NotifyError, Event};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{event as tracing_event, Level};

const IDLE_POLL: Duration = Duration::from_secs(1);

/// Completion sentinel pushed by every download task. `Done` removes the
/// torrent from the queue; `Failed` only clears the in-flight marker so
/// the next cycle retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Done(String),
    Failed(String),
}

#[derive(Error, Debug)]
enum DownloadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Everything the scheduler needs at construction time.
pub struct QueueParameters {
    pub config: Arc<Config>,
    pub rtorrent: Arc<dyn RtorrentClient>,
    pub connector: Arc<dyn RemoteConnector>,
    pub disk: Arc<dyn DiskUsage>,
    pub watch_rx: mpsc::Receiver<Result<Event, NotifyError>>,
    pub status_rx: mpsc::Receiver<StatusRequest>,
    pub shutdown_rx: broadcast::Receiver<()>,
}

pub struct Queue {
    config: Arc<Config>,
    rtorrent: Arc<dyn RtorrentClient>,
    connector: Arc<dyn RemoteConnector>,
    disk: Arc<dyn DiskUsage>,
    registry: Registry,
    /// info-hash -> metainfo path. The download queue proper.
    queued: HashMap<String, PathBuf>,
    /// info-hash -> dispatched download, removed on its completion signal.
    running: HashMap<String, DownloadInfo>,
    session: Option<Arc<dyn RemoteFs>>,
    watch_rx: mpsc::Receiver<Result<Event, NotifyError>>,
    status_rx: mpsc::Receiver<StatusRequest>,
    done_tx: mpsc::Sender<DownloadOutcome>,
    done_rx: mpsc::Receiver<DownloadOutcome>,
    shutdown_rx: broadcast::Receiver<()>,
    tasks: JoinSet<()>,
}

impl Queue {
    pub fn new(params: QueueParameters) -> Self {
        let (done_tx, done_rx) = mpsc::channel(params.config.download_jobs.max(1) as usize);
        let registry = Registry::new(Arc::clone(&params.rtorrent));

        Self {
            config: params.config,
            rtorrent: params.rtorrent,
            connector: params.connector,
            disk: params.disk,
            registry,
            queued: HashMap::new(),
            running: HashMap::new(),
            session: None,
            watch_rx: params.watch_rx,
            status_rx: params.status_rx,
            done_tx,
            done_rx,
            shutdown_rx: params.shutdown_rx,
            tasks: JoinSet::new(),
        }
    }

    /// Main cycle. Polls at roughly 1 Hz when idle and exits on the
    /// shutdown signal; abandoned downloads leave their sidecars behind
    /// for the next run.
    pub async fn run(&mut self) {
        self.scan_watch_dirs().await;

        let mut watch_open = true;
        let mut status_open = true;

        loop {
            tokio::select! {
                maybe = self.watch_rx.recv(), if watch_open => match maybe {
                    Some(event) => self.handle_fs_event(event).await,
                    None => watch_open = false,
                },
                maybe = self.status_rx.recv(), if status_open => match maybe {
                    Some(request) => self.handle_status_request(request),
                    None => status_open = false,
                },
                _ = self.shutdown_rx.recv() => break,
                Some(outcome) = self.done_rx.recv() => self.handle_outcome(outcome),
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }

            // Drain remaining events and status queries without blocking.
            while let Ok(event) = self.watch_rx.try_recv() {
                self.handle_fs_event(event).await;
            }
            while let Ok(request) = self.status_rx.try_recv() {
                self.handle_status_request(request);
            }

            if self.registry.refresh_due(self.config.update_interval()) {
                if let Err(err) = self.registry.refresh().await {
                    tracing_event!(
                        Level::WARN,
                        "Failed to update torrent list from rtorrent: {}",
                        err
                    );
                }
            }

            while let Ok(outcome) = self.done_rx.try_recv() {
                self.handle_outcome(outcome);
            }

            if self.running.is_empty() {
                self.release_idle_session().await;
            }

            self.dispatch_downloads().await;
        }

        self.shutdown().await;
    }

    /// Initial pass over every watched directory. Only first-level
    /// `.torrent` files count; subdirectories are not recursed.
    async fn scan_watch_dirs(&mut self) {
        let watch_dirs: Vec<PathBuf> = self.config.watch_to_download_paths.keys().cloned().collect();
        for watch_dir in watch_dirs {
            let entries = match std::fs::read_dir(&watch_dir) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing_event!(
                        Level::WARN,
                        "Unable to read watch path {:?}: {}",
                        watch_dir,
                        err
                    );
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() || !watcher::is_torrent_file(&path) {
                    continue;
                }
                self.admit(&path).await;
            }
        }
    }

    async fn handle_fs_event(&mut self, event: Result<Event, NotifyError>) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing_event!(Level::WARN, "Error while watching folders: {}", err);
                return;
            }
        };

        for action in watcher::classify(&event) {
            match action {
                WatchAction::Admit(path) => self.admit(&path).await,
                WatchAction::Forget(path) => self.forget(&path),
            }
        }
    }

    /// Queues a metainfo file by info-hash and uploads it to rtorrent when
    /// the registry does not know the hash yet. Idempotent on hash; parse
    /// failures drop the event.
    async fn admit(&mut self, path: &Path) {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(err) => {
                tracing_event!(Level::WARN, "Failed to read metainfo {:?}: {}", path, err);
                return;
            }
        };
        let hash = match metainfo::info_hash(&data) {
            Ok(hash) => hash,
            Err(err) => {
                tracing_event!(Level::WARN, "Failed to parse metainfo {:?}: {}", path, err);
                return;
            }
        };

        tracing_event!(Level::INFO, "Adding {:?} to download queue as {}", path, hash);
        self.queued.insert(hash.clone(), path.to_path_buf());

        if self.registry.get(&hash).is_some() {
            // Already on the server.
            return;
        }

        match self.rtorrent.add(&data).await {
            Ok(()) => {
                tracing_event!(Level::INFO, "Added torrent {:?} to rtorrent", path);
                if let Err(err) = self.registry.refresh().await {
                    tracing_event!(
                        Level::WARN,
                        "Failed to refresh torrent list after upload: {}",
                        err
                    );
                }
            }
            Err(err) => {
                tracing_event!(Level::WARN, "Unable to add torrent {:?}: {}", path, err);
            }
        }
    }

    /// Drops the queue entry whose metainfo path was deleted.
    fn forget(&mut self, path: &Path) {
        let hash = self
            .queued
            .iter()
            .find(|(_, queued_path)| queued_path.as_path() == path)
            .map(|(hash, _)| hash.clone());

        if let Some(hash) = hash {
            tracing_event!(Level::INFO, "Removing torrent {:?} from queue", path);
            self.queued.remove(&hash);
        }
    }

    fn handle_status_request(&mut self, request: StatusRequest) {
        let _ = request.reply.send(status::render(&self.running));
    }

    fn handle_outcome(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Done(hash) => {
                self.queued.remove(&hash);
                if let Some(info) = self.running.remove(&hash) {
                    tracing_event!(
                        Level::INFO,
                        "Finished {} after {:?}",
                        hash,
                        info.started.elapsed()
                    );
                }
            }
            DownloadOutcome::Failed(hash) => {
                // The queue entry stays for the next cycle's retry.
                self.running.remove(&hash);
            }
        }
    }

    async fn release_idle_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                tracing_event!(Level::DEBUG, "Failed to close idle sftp session: {}", err);
            }
        }
    }

    async fn ensure_session(&mut self) -> Option<Arc<dyn RemoteFs>> {
        if let Some(session) = &self.session {
            return Some(Arc::clone(session));
        }
        match self.connector.connect().await {
            Ok(session) => {
                self.session = Some(Arc::clone(&session));
                Some(session)
            }
            Err(err) => {
                tracing_event!(Level::WARN, "Failed to connect to sftp: {}", err);
                None
            }
        }
    }

    /// Fills free download slots with completed torrents. The queued map
    /// is snapshotted first; re-admissions mutate state only after the
    /// snapshot is taken.
    async fn dispatch_downloads(&mut self) {
        let limit = self.config.download_jobs as usize;
        if self.running.len() >= limit {
            return;
        }

        let mut snapshot: Vec<(String, PathBuf)> = self
            .queued
            .iter()
            .map(|(hash, path)| (hash.clone(), path.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.1.cmp(&b.1));

        for (hash, metainfo_path) in snapshot {
            if self.running.len() >= limit {
                break;
            }
            if self.running.contains_key(&hash) {
                continue;
            }

            let torrent = match self.registry.get(&hash) {
                Some(torrent) => torrent.clone(),
                None => {
                    // Queued locally but unknown to the server: upload again.
                    self.admit(&metainfo_path).await;
                    continue;
                }
            };
            if !torrent.completed {
                continue;
            }

            let session = match self.ensure_session().await {
                Some(session) => session,
                None => continue,
            };

            if !self.admits_disk_space(&torrent, &metainfo_path) {
                continue;
            }

            self.launch_download(session, torrent, metainfo_path);
        }
    }

    /// Admission policy: the candidate plus everything in flight must fit
    /// on every involved filesystem. Sizes are the request-time totals from
    /// rtorrent; bytes already downloaded are not subtracted.
    fn admits_disk_space(&self, torrent: &TorrentInfo, metainfo_path: &Path) -> bool {
        if !self.config.check_disk_space {
            return true;
        }

        let watch_dir = metainfo_path.parent().unwrap_or_else(|| Path::new("."));
        let mut check_paths: Vec<&Path> = Vec::new();
        if let Some(dest) = self.config.watch_to_download_paths.get(watch_dir) {
            check_paths.push(dest);
        }
        if let Some(temp) = &self.config.temp_download_path {
            check_paths.push(temp);
        }

        let mut required = torrent.size;
        for info in self.running.values() {
            required += info.size;
        }

        for path in check_paths {
            let free = match self.disk.free_bytes(path) {
                Ok(free) => free,
                Err(err) => {
                    tracing_event!(
                        Level::WARN,
                        "Failed to check disk space on {:?} for '{}': {}",
                        path,
                        torrent.name,
                        err
                    );
                    continue;
                }
            };

            let fits = if self.config.min_disk_space == 0 {
                free > required
            } else {
                free >= required && free - required >= self.config.min_disk_space
            };
            if !fits {
                tracing_event!(
                    Level::INFO,
                    "Not downloading '{}', only {} bytes free on {:?} with {} required",
                    torrent.name,
                    free,
                    path,
                    required
                );
                return false;
            }
        }

        true
    }

    fn launch_download(
        &mut self,
        session: Arc<dyn RemoteFs>,
        torrent: TorrentInfo,
        metainfo_path: PathBuf,
    ) {
        let watch_dir = metainfo_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let dest_dir = match self.config.watch_to_download_paths.get(&watch_dir) {
            Some(dest) => dest.clone(),
            None => {
                tracing_event!(
                    Level::WARN,
                    "No download path bound to watch directory {:?}",
                    watch_dir
                );
                return;
            }
        };

        let download_dir = match &self.config.temp_download_path {
            Some(temp) => stage_path(temp, &dest_dir),
            None => dest_dir.clone(),
        };

        tracing_event!(
            Level::INFO,
            "Downloading '{}' ({:?}) to {:?} ({} bytes)",
            torrent.name,
            metainfo_path,
            download_dir,
            torrent.size
        );

        self.running.insert(
            torrent.hash.clone(),
            DownloadInfo {
                path: download_dir.join(remote::base_name(&torrent.path)),
                size: torrent.size,
                started: Instant::now(),
            },
        );

        let task = DownloadTask {
            session,
            torrent,
            metainfo_path,
            dest_dir,
            download_dir,
            finish_dir: self.config.watch_to_finish_path.get(&watch_dir).cloned(),
            opts: FetchOptions {
                workers: self.config.download_streams,
                resume: self.config.resume_downloads,
                file_mode: self.config.file_download_filemode,
            },
            done_tx: self.done_tx.clone(),
        };
        self.tasks.spawn(task.run());
    }

    async fn shutdown(&mut self) {
        tracing_event!(Level::INFO, "Shutting down queue");
        // In-flight downloads are abandoned; their sidecars stay on disk
        // so the next run resumes them.
        self.tasks.shutdown().await;
        self.release_idle_session().await;
    }
}

/// Joins the staging root with a destination directory, keeping the
/// destination's full layout beneath the root (`/stage` + `/data/tv` =
/// `/stage/data/tv`).
fn stage_path(temp: &Path, dest: &Path) -> PathBuf {
    let mut out = temp.to_path_buf();
    for component in dest.components() {
        if let Component::Normal(name) = component {
            out.push(name);
        }
    }
    out
}

struct DownloadTask {
    session: Arc<dyn RemoteFs>,
    torrent: TorrentInfo,
    metainfo_path: PathBuf,
    dest_dir: PathBuf,
    download_dir: PathBuf,
    finish_dir: Option<PathBuf>,
    opts: FetchOptions,
    done_tx: mpsc::Sender<DownloadOutcome>,
}

impl DownloadTask {
    async fn run(self) {
        let hash = self.torrent.hash.clone();
        match self.execute().await {
            Ok(()) => {
                tracing_event!(
                    Level::INFO,
                    "Successfully downloaded '{}' ({:?})",
                    self.torrent.name,
                    self.metainfo_path
                );
                let _ = self.done_tx.send(DownloadOutcome::Done(hash)).await;
            }
            Err(err) => {
                tracing_event!(
                    Level::WARN,
                    "Failed to download '{}' ({:?}): {}",
                    self.torrent.name,
                    self.metainfo_path,
                    err
                );
                let _ = self.done_tx.send(DownloadOutcome::Failed(hash)).await;
            }
        }
    }

    async fn execute(&self) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;

        mirror(
            &self.session,
            &self.torrent.path,
            &self.download_dir,
            self.opts,
        )
        .await?;

        // Staged payloads move from the temp tree into the destination.
        if self.download_dir != self.dest_dir {
            tokio::fs::create_dir_all(&self.dest_dir).await?;
            let name = remote::base_name(&self.torrent.path);
            tokio::fs::rename(self.download_dir.join(name), self.dest_dir.join(name)).await?;
        }

        // Metainfo disposition: archive when the watch has a finish path,
        // delete otherwise.
        match &self.finish_dir {
            Some(finish_dir) => {
                tokio::fs::create_dir_all(finish_dir).await?;
                let file_name = self.metainfo_path.file_name().unwrap_or_default();
                tokio::fs::rename(&self.metainfo_path, finish_dir.join(file_name)).await?;
            }
            None => match tokio::fs::remove_file(&self.metainfo_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }

        Ok(())
    }
}
