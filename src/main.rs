// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod integrations;
mod metainfo;
mod queue;
mod remote;
mod transfer;

use crate::config::Config;
use crate::integrations::disk::SystemDisks;
use crate::integrations::rtorrent::{RtorrentClient, XmlRpc};
use crate::integrations::watcher;
use crate::queue::rpc;
use crate::queue::{Queue, QueueParameters};
use crate::remote::sftp::SftpConnector;
use crate::remote::RemoteConnector;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{fmt, prelude::*};

const DEFAULT_LOG_FILTER: LevelFilter = LevelFilter::INFO;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration document (.toml, .yaml, or .json).
    #[arg(short, long)]
    config: PathBuf,

    /// Print the running daemon's download status and exit.
    #[arg(long)]
    status: bool,
}

fn init_tracing() {
    let filter = Targets::new().with_default(DEFAULT_LOG_FILTER);
    let layer = fmt::layer().with_ansi(false).with_filter(filter);
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration at {:?}: {}", cli.config, err);
            return ExitCode::FAILURE;
        }
    };

    if cli.status {
        return query_status(&config.rpc_socket_path).await;
    }

    init_tracing();
    tracing::info!("Starting hoarder");

    let config = Arc::new(config);

    let rtorrent: Arc<dyn RtorrentClient> = match XmlRpc::new(
        &config.rtorrent.addr,
        config.rtorrent.insecure_cert,
        &config.rtorrent.username,
        &config.rtorrent.password,
    ) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!("Failed to build rtorrent client: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let connector: Arc<dyn RemoteConnector> = Arc::new(SftpConnector::new(config.ssh.clone()));

    // This connection is only made to verify the SSH settings.
    match connector.connect().await {
        Ok(session) => {
            let _ = session.close().await;
        }
        Err(err) => {
            tracing::error!("Failed to connect to sftp: {}", err);
            return ExitCode::FAILURE;
        }
    }

    let (watch_tx, watch_rx) = mpsc::channel(64);
    let watch_dirs: Vec<&Path> = config
        .watch_to_download_paths
        .keys()
        .map(PathBuf::as_path)
        .collect();
    let _watcher = match watcher::create_watcher(watch_dirs, watch_tx) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!("Failed to install filesystem watcher: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let listener = match UnixListener::bind(&config.rpc_socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(
                "Failed to bind rpc socket {:?}: {}",
                config.rpc_socket_path,
                err
            );
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, _) = broadcast::channel(4);
    let (status_tx, status_rx) = mpsc::channel(16);
    let rpc_task = tokio::spawn(rpc::serve(listener, status_tx, shutdown_tx.subscribe()));

    let mut queue = Queue::new(QueueParameters {
        config: Arc::clone(&config),
        rtorrent,
        connector,
        disk: Arc::new(SystemDisks),
        watch_rx,
        status_rx,
        shutdown_rx: shutdown_tx.subscribe(),
    });
    let queue_task = tokio::spawn(async move { queue.run().await });

    wait_for_stop_signal().await;
    tracing::info!("Stop signal received, shutting down");
    let _ = shutdown_tx.send(());

    let _ = queue_task.await;
    let _ = rpc_task.await;
    let _ = std::fs::remove_file(&config.rpc_socket_path);

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn query_status(socket_path: &Path) -> ExitCode {
    match rpc::query_downloads(socket_path).await {
        Ok(reply) => {
            if reply.is_empty() {
                println!("No Downloads");
            } else {
                println!("{}", reply);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Failed to query status socket {:?}: {}", socket_path, err);
            ExitCode::FAILURE
        }
    }
}

async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
