// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("watch_to_download_paths must not be empty")]
    MissingWatchPaths,
    #[error("rpc_socket_path must be set")]
    MissingRpcSocketPath,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RtorrentConfig {
    /// XMLRPC endpoint, e.g. `https://seedbox.example/RPC2`.
    pub addr: String,
    pub insecure_cert: bool,
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SshConfig {
    pub username: String,
    pub password: String,
    pub privkey_path: String,
    /// `host:port`.
    pub addr: String,
    /// Nanoseconds.
    pub connect_timeout: u64,
}

impl SshConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.connect_timeout)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub rtorrent: RtorrentConfig,
    pub ssh: SshConfig,
    pub file_download_filemode: u32,
    /// Watched blackhole directory -> payload destination directory.
    pub watch_to_download_paths: HashMap<PathBuf, PathBuf>,
    /// Optional staging root; payloads land here first and are renamed
    /// into the destination when complete.
    pub temp_download_path: Option<PathBuf>,
    /// Watched directory -> archive directory for finished metainfo files.
    /// Watches without an entry have their metainfo deleted instead.
    pub watch_to_finish_path: HashMap<PathBuf, PathBuf>,
    /// Nanoseconds between torrent-list refreshes.
    pub rtorrent_update_interval: u64,
    pub download_jobs: u32,
    /// Parallel byte-range streams per file download.
    pub download_streams: u32,
    pub resume_downloads: bool,
    pub rpc_socket_path: PathBuf,
    pub check_disk_space: bool,
    pub min_disk_space: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtorrent: RtorrentConfig::default(),
            ssh: SshConfig::default(),
            file_download_filemode: 0o777,
            watch_to_download_paths: HashMap::new(),
            temp_download_path: None,
            watch_to_finish_path: HashMap::new(),
            rtorrent_update_interval: Duration::from_secs(300).as_nanos() as u64,
            download_jobs: 1,
            download_streams: 4,
            resume_downloads: false,
            rpc_socket_path: PathBuf::new(),
            check_disk_space: false,
            min_disk_space: 0,
        }
    }
}

impl Config {
    /// Loads the configuration document at `path`, picking the format from
    /// the file extension, and overlays `HOARDER_`-prefixed environment
    /// variables (`__` separates nested keys).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Figment::new().merge(Json::file(path)),
            Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
            _ => Figment::new().merge(Toml::file(path)),
        };
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let mut config: Config = figment
            .merge(Env::prefixed("HOARDER_").split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.watch_to_download_paths.is_empty() {
            return Err(ConfigError::MissingWatchPaths);
        }
        if self.rpc_socket_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRpcSocketPath);
        }

        self.watch_to_download_paths = std::mem::take(&mut self.watch_to_download_paths)
            .into_iter()
            .map(|(watch, download)| (clean_path(&watch), clean_path(&download)))
            .collect();
        self.watch_to_finish_path = std::mem::take(&mut self.watch_to_finish_path)
            .into_iter()
            .map(|(watch, finish)| (clean_path(&watch), clean_path(&finish)))
            .collect();

        self.temp_download_path = self
            .temp_download_path
            .take()
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| clean_path(&path));

        if self.download_jobs == 0 {
            self.download_jobs = 1;
        }
        if self.download_streams == 0 {
            self.download_streams = 1;
        }

        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_nanos(self.rtorrent_update_interval)
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching the
/// filesystem, so map lookups by watch directory are exact.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
