// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use data_encoding::HEXUPPER;
use serde_bencode::de;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetainfoError {
    #[error("bencode parsing error: {0}")]
    Bencode(#[from] serde_bencode::Error),
    #[error("missing 'info' dictionary in torrent file")]
    MissingInfoDict,
}

/// Derives the info-hash of a raw metainfo blob as 40 characters of
/// uppercase hex.
///
/// The hash covers the re-encoded `info` dictionary, not the raw input
/// slice, so surrounding keys (`announce`, `comment`, ...) do not affect it.
pub fn info_hash(bencode_data: &[u8]) -> Result<String, MetainfoError> {
    let generic: Value = de::from_bytes(bencode_data)?;

    let info = if let Value::Dict(mut top_level) = generic {
        top_level
            .remove("info".as_bytes())
            .ok_or(MetainfoError::MissingInfoDict)?
    } else {
        return Err(MetainfoError::MissingInfoDict);
    };

    let info_bencode = serde_bencode::to_bytes(&info)?;
    let digest = Sha1::digest(&info_bencode);

    Ok(HEXUPPER.encode(digest.as_slice()))
}
