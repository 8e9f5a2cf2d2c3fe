//! On-disk helpers for the vector index.
//!
//! Every file is written to `<name>.tmp` and renamed into place. Backend
//! blobs carry a footer `[magic "LSX1"][u32 CRC32 BE]` that is verified on
//! read.

use std::fs;
use std::path::Path;

use crate::error::IndexError;

const BLOB_MAGIC: &[u8; 4] = b"LSX1";
const FOOTER_LEN: usize = 8;

/// Write `bytes` to `path` via temp file + rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IndexError::corrupt(path.display(), "path has no file name"))?;
    let tmp_path = path.with_file_name(format!("{}.tmp", file_name));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Write a checksummed blob.
pub fn write_blob(path: &Path, payload: &[u8]) -> Result<(), IndexError> {
    let crc = crc32fast::hash(payload);
    let mut output = Vec::with_capacity(payload.len() + FOOTER_LEN);
    output.extend_from_slice(payload);
    output.extend_from_slice(BLOB_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());
    atomic_write(path, &output)?;
    tracing::debug!(
        path = %path.display(),
        bytes = payload.len(),
        "wrote index blob (CRC32={:#010x})",
        crc
    );
    Ok(())
}

/// Read a checksummed blob and return its payload.
pub fn read_blob(path: &Path) -> Result<Vec<u8>, IndexError> {
    let mut bytes = fs::read(path)?;
    if bytes.len() < FOOTER_LEN {
        return Err(IndexError::corrupt(path.display(), "file too short"));
    }
    let payload_len = bytes.len() - FOOTER_LEN;
    if &bytes[payload_len..payload_len + 4] != BLOB_MAGIC {
        return Err(IndexError::corrupt(path.display(), "missing checksum footer"));
    }
    let stored = u32::from_be_bytes([
        bytes[payload_len + 4],
        bytes[payload_len + 5],
        bytes[payload_len + 6],
        bytes[payload_len + 7],
    ]);
    let computed = crc32fast::hash(&bytes[..payload_len]);
    if stored != computed {
        return Err(IndexError::corrupt(
            path.display(),
            format!(
                "CRC32 mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            ),
        ));
    }
    bytes.truncate(payload_len);
    Ok(bytes)
}

/// Encode an id mapping as consecutive little-endian `i64`s.
pub fn encode_ids(ids: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

pub fn decode_ids(path: &Path, bytes: &[u8]) -> Result<Vec<i64>, IndexError> {
    if bytes.len() % 8 != 0 {
        return Err(IndexError::corrupt(
            path.display(),
            format!("id mapping length {} is not a multiple of 8", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
