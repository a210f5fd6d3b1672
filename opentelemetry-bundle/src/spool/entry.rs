//! On-disk entry codec.
//!
//! One file per undelivered payload, self-describing and self-checking:
//!
//! ```text
//! magic(4)="SPL1" | version(u16)=1 | meta_len(u32) | meta JSON
//!     | body_len(u64) | body | crc32(4)
//! ```
//!
//! All integers little-endian. The CRC covers every preceding byte, so a torn
//! write anywhere in the record is detected as a whole. The metadata block is
//! a small JSON object; the payload is opaque bytes (an HTTP request body or
//! a serialized protobuf export request). Readers treat any magic, version,
//! length, or checksum mismatch as poison — such entries are dropped, never
//! retried and never allowed to block the queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Protocol;

pub(crate) const ENTRY_MAGIC: [u8; 4] = *b"SPL1";
pub(crate) const ENTRY_VERSION: u16 = 1;

/// Delivery metadata persisted alongside each payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Which transport replays this entry.
    pub protocol: Protocol,
    /// Full URL for HTTP entries; gRPC method path for gRPC entries.
    pub target: String,
    /// Outbound headers (gRPC: request metadata).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Payload content type, when the transport needs to restate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Why a persisted entry could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entry truncated at {0} bytes")]
    Truncated(usize),
    #[error("unknown entry magic")]
    BadMagic,
    #[error("unsupported entry version {0}")]
    BadVersion(u16),
    #[error("entry checksum mismatch")]
    ChecksumMismatch,
    #[error("entry metadata is not valid JSON: {0}")]
    Meta(#[from] serde_json::Error),
}

pub(crate) fn encode(meta: &EntryMeta, body: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let meta_bytes = serde_json::to_vec(meta)?;
    let mut buf = Vec::with_capacity(4 + 2 + 4 + meta_bytes.len() + 8 + body.len() + 4);
    buf.extend_from_slice(&ENTRY_MAGIC);
    buf.extend_from_slice(&ENTRY_VERSION.to_le_bytes());
    buf.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&meta_bytes);
    buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
    buf.extend_from_slice(body);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

pub(crate) fn decode(raw: &[u8]) -> Result<(EntryMeta, Vec<u8>), DecodeError> {
    // Checksum first: a record that fails the CRC is poison no matter how
    // plausible its header bytes look.
    if raw.len() < 4 {
        return Err(DecodeError::Truncated(raw.len()));
    }
    let (content, crc_bytes) = raw.split_at(raw.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(content) != stored_crc {
        return Err(DecodeError::ChecksumMismatch);
    }

    let mut cursor = Cursor::new(content);
    if cursor.take_array::<4>()? != ENTRY_MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = u16::from_le_bytes(cursor.take_array()?);
    if version != ENTRY_VERSION {
        return Err(DecodeError::BadVersion(version));
    }
    let meta_len = u32::from_le_bytes(cursor.take_array()?) as usize;
    let meta_bytes = cursor.take(meta_len)?;
    let meta: EntryMeta = serde_json::from_slice(meta_bytes)?;
    let body_len = u64::from_le_bytes(cursor.take_array()?) as usize;
    let body = cursor.take(body_len)?;
    if !cursor.is_empty() {
        // Trailing garbage would have failed the CRC already unless it was
        // written deliberately; reject it the same way.
        return Err(DecodeError::Truncated(raw.len()));
    }
    Ok((meta, body.to_vec()))
}

struct Cursor<'a> {
    rest: &'a [u8],
    consumed: usize,
}

impl<'a> Cursor<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Cursor { rest, consumed: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.rest.len() < n {
            return Err(DecodeError::Truncated(self.consumed + self.rest.len()));
        }
        let (taken, rest) = self.rest.split_at(n);
        self.rest = rest;
        self.consumed += n;
        Ok(taken)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }
}
