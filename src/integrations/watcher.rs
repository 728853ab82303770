// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Blackhole directory watching. Watched directories are single-level:
//! subdirectories get their own watch binding or none at all.

use notify::{Config, Error as NotifyError, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{event as tracing_event, Level};

/// What the scheduler should do with a filesystem event's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Admit(PathBuf),
    Forget(PathBuf),
}

/// Installs a non-recursive watch on every directory and forwards raw
/// events into the scheduler's channel. Failure to install any watch is a
/// startup error.
pub fn create_watcher<'a>(
    watch_paths: impl IntoIterator<Item = &'a Path>,
    tx: mpsc::Sender<Result<Event, NotifyError>>,
) -> Result<RecommendedWatcher, NotifyError> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, NotifyError>| {
            if let Err(err) = tx.blocking_send(res) {
                tracing_event!(Level::ERROR, "Failed to forward file event: {}", err);
            }
        },
        Config::default(),
    )?;

    for path in watch_paths {
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        tracing_event!(Level::INFO, "Watching blackhole path: {:?}", path);
    }

    Ok(watcher)
}

pub fn is_torrent_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("torrent")
}

/// Maps a notify event onto queue actions. Creates, writes, and renames of
/// `.torrent` files become admissions; removals become forgets (the queue
/// only drops paths it actually tracks). Everything else is ignored.
pub fn classify(event: &Event) -> Vec<WatchAction> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|path| is_torrent_file(path))
            .map(|path| WatchAction::Admit(path.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|path| WatchAction::Forget(path.clone()))
            .collect(),
        _ => Vec::new(),
    }
}
