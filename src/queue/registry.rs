// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cached snapshot of the torrents rtorrent knows about.

use crate::integrations::rtorrent::{RtorrentClient, RtorrentError, TorrentInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Registry {
    client: Arc<dyn RtorrentClient>,
    torrents: HashMap<String, TorrentInfo>,
    last_refresh: Option<Instant>,
}

impl Registry {
    pub fn new(client: Arc<dyn RtorrentClient>) -> Self {
        Self {
            client,
            torrents: HashMap::new(),
            last_refresh: None,
        }
    }

    /// Replaces the snapshot wholesale with the server's current list.
    /// Hashes are uppercased here, once; lookups assume canonical form.
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&mut self) -> Result<(), RtorrentError> {
        let list = self.client.torrents().await?;

        let mut torrents = HashMap::with_capacity(list.len());
        for mut torrent in list {
            torrent.hash = torrent.hash.to_ascii_uppercase();
            torrents.insert(torrent.hash.clone(), torrent);
        }

        self.torrents = torrents;
        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// True when the snapshot has never been taken or has outlived
    /// `interval`.
    pub fn refresh_due(&self, interval: Duration) -> bool {
        self.last_refresh
            .map_or(true, |taken| taken.elapsed() >= interval)
    }

    /// Looks up a torrent by canonical (uppercase) info-hash.
    pub fn get(&self, hash: &str) -> Option<&TorrentInfo> {
        self.torrents.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRtorrent {
        responses: Mutex<Vec<Result<Vec<TorrentInfo>, RtorrentError>>>,
    }

    impl FakeRtorrent {
        fn new(responses: Vec<Result<Vec<TorrentInfo>, RtorrentError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl RtorrentClient for FakeRtorrent {
        async fn torrents(&self) -> Result<Vec<TorrentInfo>, RtorrentError> {
            self.responses.lock().unwrap().remove(0)
        }

        async fn add(&self, _metainfo: &[u8]) -> Result<(), RtorrentError> {
            Ok(())
        }
    }

    fn torrent(hash: &str, name: &str) -> TorrentInfo {
        TorrentInfo {
            hash: hash.to_string(),
            name: name.to_string(),
            path: format!("/seed/{}", name),
            size: 1024,
            completed: true,
        }
    }

    #[tokio::test]
    async fn test_refresh_uppercases_hashes() {
        let client = FakeRtorrent::new(vec![Ok(vec![torrent(
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b",
            "ubuntu.iso",
        )])]);
        let mut registry = Registry::new(client);

        registry.refresh().await.unwrap();

        let stored = registry
            .get("9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B")
            .expect("uppercase lookup must hit");
        assert_eq!(stored.hash, "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B");
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let client = FakeRtorrent::new(vec![
            Ok(vec![torrent("A".repeat(40).as_str(), "first")]),
            Ok(vec![torrent("B".repeat(40).as_str(), "second")]),
        ]);
        let mut registry = Registry::new(client);

        registry.refresh().await.unwrap();
        assert!(registry.get(&"A".repeat(40)).is_some());

        registry.refresh().await.unwrap();
        assert!(registry.get(&"A".repeat(40)).is_none());
        assert!(registry.get(&"B".repeat(40)).is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let client = FakeRtorrent::new(vec![
            Ok(vec![torrent("A".repeat(40).as_str(), "first")]),
            Err(RtorrentError::Status(502)),
        ]);
        let mut registry = Registry::new(client);

        registry.refresh().await.unwrap();
        assert!(registry.refresh().await.is_err());
        assert!(
            registry.get(&"A".repeat(40)).is_some(),
            "failed refresh must not clear the snapshot"
        );
    }

    #[tokio::test]
    async fn test_refresh_due() {
        let client = FakeRtorrent::new(vec![Ok(Vec::new())]);
        let mut registry = Registry::new(client);

        assert!(registry.refresh_due(Duration::from_secs(60)));
        registry.refresh().await.unwrap();
        assert!(!registry.refresh_due(Duration::from_secs(60)));
        assert!(registry.refresh_due(Duration::ZERO));
    }
}
