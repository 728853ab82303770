// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Local-only status endpoint: a unix-socket line protocol with a single
//! method. Requests are forwarded to the scheduler, which renders the
//! status view and replies through a oneshot channel.

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{event as tracing_event, Level};

pub const DOWNLOADS_METHOD: &str = "downloads";

/// One status query in flight between the endpoint and the scheduler.
#[derive(Debug)]
pub struct StatusRequest {
    pub reply: oneshot::Sender<String>,
}

/// Accept loop for the status socket. Runs until shutdown is signaled.
pub async fn serve(
    listener: UnixListener,
    tx: mpsc::Sender<StatusRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        tracing_event!(Level::WARN, "Failed to accept rpc connection: {}", err);
                        continue;
                    }
                };
                tokio::spawn(handle_connection(stream, tx.clone()));
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<StatusRequest>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if let Err(err) = reader.read_line(&mut line).await {
        tracing_event!(Level::WARN, "Failed to read rpc request: {}", err);
        return;
    }

    let reply = match line.trim() {
        DOWNLOADS_METHOD => {
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(StatusRequest { reply: reply_tx }).await.is_err() {
                "error: scheduler is shutting down".to_string()
            } else {
                reply_rx
                    .await
                    .unwrap_or_else(|_| "error: scheduler dropped the request".to_string())
            }
        }
        other => format!("error: unknown method '{}'", other),
    };

    let mut stream = reader.into_inner();
    if let Err(err) = stream.write_all(reply.as_bytes()).await {
        tracing_event!(Level::WARN, "Failed to write rpc reply: {}", err);
    }
    let _ = stream.shutdown().await;
}

/// Client side of the endpoint, used by the `--status` flag.
pub async fn query_downloads(socket_path: &Path) -> std::io::Result<String> {
    let mut stream = UnixStream::connect(socket_path).await?;
    stream
        .write_all(format!("{}\n", DOWNLOADS_METHOD).as_bytes())
        .await?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn scratch_socket() -> PathBuf {
        std::env::temp_dir().join(format!("hoarder_rpc_test_{}.sock", rand::random::<u32>()))
    }

    #[tokio::test]
    async fn test_downloads_roundtrip() {
        let socket_path = scratch_socket();
        let listener = UnixListener::bind(&socket_path).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);

        let server = tokio::spawn(serve(listener, tx, shutdown_tx.subscribe()));
        let responder = tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let _ = req.reply.send("alpha   |==>   | ( 9%)".to_string());
            }
        });

        let reply = timeout(Duration::from_secs(5), query_downloads(&socket_path))
            .await
            .expect("query timed out")
            .unwrap();
        assert_eq!(reply, "alpha   |==>   | ( 9%)");

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        responder.abort();
        let _ = std::fs::remove_file(socket_path);
    }

    #[tokio::test]
    async fn test_unknown_method_is_reported() {
        let socket_path = scratch_socket();
        let listener = UnixListener::bind(&socket_path).unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);

        let server = tokio::spawn(serve(listener, tx, shutdown_tx.subscribe()));

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream.write_all(b"uploads\n").await.unwrap();
        let mut reply = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(reply, "error: unknown method 'uploads'");

        shutdown_tx.send(()).unwrap();
        let _ = timeout(Duration::from_secs(5), server).await;
        let _ = std::fs::remove_file(socket_path);
    }
}
