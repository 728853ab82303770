// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Human-readable download status, rendered on demand for the inspection
//! endpoint. Output looks like:
//!
//! ```text
//! Totally.Legit.Download.x264-KILLERS   |===============>              |  (50%)
//! ubuntu.13.37.iso                      |===>                          |  ( 7%)
//! Errored.Download.mkv                  |                              |  (error: could not stat file)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

const BAR_LENGTH: usize = 30;

/// One dispatched download, tracked until its completion signal arrives.
#[derive(Debug, Clone)]
pub struct DownloadInfo {
    /// Where the payload is landing right now (the staging dir when one is
    /// configured).
    pub path: PathBuf,
    /// Expected payload size as reported by rtorrent.
    pub size: u64,
    pub started: Instant,
}

/// Renders the in-flight downloads, sorted by name, names right-padded to
/// the longest, each with a fixed-width progress bar computed from the
/// bytes already on disk. Lines are joined by newline with no trailing
/// newline; no downloads renders as the empty string.
pub fn render(downloads: &HashMap<String, DownloadInfo>) -> String {
    let mut rows: Vec<(String, &DownloadInfo)> = downloads
        .values()
        .map(|info| {
            let name = info
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, info)
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let max_name_len = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    let mut lines = Vec::with_capacity(rows.len());
    for (name, info) in rows {
        let mut line = format!("{:<width$}   |", name, width = max_name_len);

        match on_disk_size(&info.path) {
            Ok(bytes_downloaded) => {
                let percent_done = if info.size == 0 {
                    1.0
                } else {
                    bytes_downloaded as f64 / info.size as f64
                };
                let partial = ((BAR_LENGTH as f64 * percent_done) as usize).min(BAR_LENGTH);
                if partial > 0 {
                    line.push_str(&"=".repeat(partial - 1));
                    line.push('>');
                }
                line.push_str(&" ".repeat(BAR_LENGTH - partial));
                line.push_str(&format!("| ({:2}%)", (100.0 * percent_done) as u64));
            }
            Err(err) => {
                line.push_str(&" ".repeat(BAR_LENGTH));
                line.push_str(&format!("| (error: {})", err));
            }
        }

        lines.push(line);
    }

    lines.join("\n")
}

/// Size of the payload on disk so far: the file size, or the recursive sum
/// for a directory payload.
fn on_disk_size(path: &Path) -> std::io::Result<u64> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }

    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}
