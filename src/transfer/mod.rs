// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod fetcher;
pub mod mirror;
pub mod progress;

use thiserror::Error;

/// Read/write buffer size for byte-range workers. The final chunk of a
/// partition shrinks to fit.
pub const CHUNK_SIZE: u64 = 512 * 1024;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Remote(#[from] crate::remote::RemoteError),
    #[error("premature end-of-file at offset {offset} of '{path}', expected data until {stop}")]
    PrematureEof {
        path: String,
        offset: u64,
        stop: u64,
    },
    #[error("download worker panicked: {0}")]
    WorkerPanic(String),
}

/// Per-download knobs the scheduler hands to the transfer layer.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Parallel byte-range workers per file, >= 1.
    pub workers: u32,
    /// Enables the progress sidecar (checkpoint, resume, destroy).
    pub resume: bool,
    /// Mode for created payload files and mirrored directories.
    pub file_mode: u32,
}
