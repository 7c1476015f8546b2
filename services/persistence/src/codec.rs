//! Framed snapshot codec
//!
//! Self-describing byte stream: a header record `{magic, version,
//! created_at}` followed by one record per symbol. Every record is a
//! length-prefixed frame with a CRC32C trailer:
//!
//! ```text
//! [payload_len: u32 le][payload: bincode bytes][checksum: u32 le]
//! ```
//!
//! Decode rejects foreign magic, unsupported versions, checksum
//! mismatches, truncation, and duplicate symbols. Book-level invariants
//! are enforced one layer up, when the decoded records are restored into
//! order books.

use crc32c::crc32c;
use matching_engine::snapshot::{BookSnapshot, EngineSnapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Identifies an order-book snapshot stream ("OBSN").
pub const SNAPSHOT_MAGIC: u32 = 0x4E53_424F;

/// Current stream format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("stream truncated at offset {0}")]
    Truncated(usize),

    #[error("bad magic {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch at offset {offset}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        offset: usize,
        stored: u32,
        computed: u32,
    },

    #[error("stream has no header record")]
    MissingHeader,

    #[error("duplicate symbol {0} in stream")]
    DuplicateSymbol(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HeaderRecord {
    magic: u32,
    version: u32,
    created_at: i64,
}

/// Serialize a snapshot to the framed byte stream.
pub fn encode(snapshot: &EngineSnapshot) -> Result<Vec<u8>, CodecError> {
    let header = HeaderRecord {
        magic: SNAPSHOT_MAGIC,
        version: SNAPSHOT_VERSION,
        created_at: snapshot.created_at,
    };

    let mut buf = Vec::new();
    write_frame(
        &mut buf,
        &bincode::serialize(&header).map_err(|e| CodecError::Serialization(e.to_string()))?,
    );
    for book in &snapshot.books {
        write_frame(
            &mut buf,
            &bincode::serialize(book).map_err(|e| CodecError::Serialization(e.to_string()))?,
        );
    }
    Ok(buf)
}

/// Parse a framed byte stream back into a snapshot.
pub fn decode(bytes: &[u8]) -> Result<EngineSnapshot, CodecError> {
    let mut offset = 0usize;

    let header_payload = read_frame(bytes, &mut offset)?.ok_or(CodecError::MissingHeader)?;
    let header: HeaderRecord = bincode::deserialize(header_payload)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    if header.magic != SNAPSHOT_MAGIC {
        return Err(CodecError::BadMagic {
            found: header.magic,
            expected: SNAPSHOT_MAGIC,
        });
    }
    if header.version > SNAPSHOT_VERSION {
        return Err(CodecError::UnsupportedVersion(header.version));
    }

    let mut books = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    while let Some(payload) = read_frame(bytes, &mut offset)? {
        let book: BookSnapshot = bincode::deserialize(payload)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        if !seen.insert(book.symbol.clone()) {
            return Err(CodecError::DuplicateSymbol(book.symbol));
        }
        books.push(book);
    }

    Ok(EngineSnapshot {
        created_at: header.created_at,
        books,
    })
}

/// Deterministic SHA-256 hash over the book records.
///
/// Excludes the header timestamp, so two snapshots of identical book state
/// compare equal regardless of when they were taken. Used by replay tests
/// to compare engine states.
pub fn state_hash(snapshot: &EngineSnapshot) -> String {
    let bytes = bincode::serialize(&snapshot.books)
        .expect("book snapshot serialization should never fail");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

fn write_frame(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32c(payload).to_le_bytes());
}

/// Read one frame starting at `offset`, verifying its checksum. Returns
/// None at a clean end of stream.
fn read_frame<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<Option<&'a [u8]>, CodecError> {
    if *offset == bytes.len() {
        return Ok(None);
    }
    if bytes.len() - *offset < 4 {
        return Err(CodecError::Truncated(*offset));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[*offset..*offset + 4]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let payload_start = *offset + 4;
    let checksum_start = payload_start
        .checked_add(payload_len)
        .ok_or(CodecError::Truncated(*offset))?;
    if bytes.len() < checksum_start + 4 {
        return Err(CodecError::Truncated(*offset));
    }

    let payload = &bytes[payload_start..checksum_start];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[checksum_start..checksum_start + 4]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc32c(payload);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch {
            offset: *offset,
            stored,
            computed,
        });
    }

    *offset = checksum_start + 4;
    Ok(Some(payload))
}
