//! ICC colour profiles carried in JPEG APP2 segments.
//!
//! A profile larger than one marker segment is split across several APP2
//! segments, each tagged with a 1-based chunk index and the total chunk count:
//!
//! ```text
//! FF E2 | LL LL | "ICC_PROFILE\0" | index | count | payload...
//!        \_ payload.len() + 2 + 14
//! ```
//!
//! [`extract`] reassembles the chunks in index order; [`inject`] splits a
//! profile back into segments and inserts them right after SOI. The profile
//! bytes themselves are never interpreted.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use super::segment::{self, APP2, EXTRACT_SCAN_LIMIT, INJECT_SCAN_LIMIT, SOI};

/// Largest payload a single marker segment can hold (65535 minus the length field).
pub const MAX_BYTES_IN_MARKER: usize = 65533;

/// `"ICC_PROFILE\0"` plus the index and count bytes.
pub const ICC_HEADER_LEN: usize = 14;

/// Profile bytes carried by each full chunk.
pub const MAX_CHUNK_PAYLOAD: usize = MAX_BYTES_IN_MARKER - ICC_HEADER_LEN;

/// Signature that opens every ICC APP2 payload.
pub const ICC_MARKER: &[u8; 12] = b"ICC_PROFILE\0";

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("no start-of-image marker within the first {0} markers")]
    NoStartOfImage(usize),
    #[error("profile of {size} bytes needs {chunks} chunks (at most 255 fit)")]
    TooManyChunks { size: usize, chunks: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An APP2 segment that looked like an ICC chunk but could not be one.
/// Dropped during extraction, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MalformedProfileSegment {
    TooShort { offset: usize },
    BadSequence { offset: usize, index: u8, count: u8 },
}

/// An embedded colour profile, kept as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IccProfile {
    bytes: Vec<u8>,
}

impl IccProfile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of APP2 segments needed to carry the profile.
    pub fn chunk_count(&self) -> usize {
        self.bytes.len().div_ceil(MAX_CHUNK_PAYLOAD)
    }

    /// Size of the final chunk.
    ///
    /// A profile that is an exact multiple of [`MAX_CHUNK_PAYLOAD`] ends in a
    /// full chunk, not an empty one.
    pub fn last_chunk_len(&self) -> usize {
        if self.bytes.is_empty() {
            return 0;
        }
        match self.bytes.len() % MAX_CHUNK_PAYLOAD {
            0 => MAX_CHUNK_PAYLOAD,
            rest => rest,
        }
    }

    /// Payload of chunk `index` (1-based).
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        let count = self.chunk_count();
        if index == 0 || index > count {
            return None;
        }
        let start = (index - 1) * MAX_CHUNK_PAYLOAD;
        let len = if index == count {
            self.last_chunk_len()
        } else {
            MAX_CHUNK_PAYLOAD
        };
        self.bytes.get(start..start + len)
    }

    /// Encode every chunk as a complete APP2 segment, marker included.
    pub fn app2_segments(&self) -> Result<Vec<u8>, InjectError> {
        let count = self.chunk_count();
        if count > u8::MAX as usize {
            return Err(InjectError::TooManyChunks {
                size: self.len(),
                chunks: count,
            });
        }

        let mut out = Vec::with_capacity(self.len() + count * (ICC_HEADER_LEN + 4));
        for index in 1..=count {
            let Some(chunk) = self.chunk(index) else {
                break;
            };
            // Bounded by MAX_BYTES_IN_MARKER + 2, which fits in u16.
            let length = (chunk.len() + 2 + ICC_HEADER_LEN) as u16;
            out.extend_from_slice(&[0xFF, APP2]);
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(ICC_MARKER);
            out.push(index as u8);
            out.push(count as u8);
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Extraction
// ----------------------------------------------------------------------------

/// Read the embedded ICC profile out of a JPEG byte stream.
///
/// Returns `None` when there is no profile or when the chunks found never
/// form a complete `1..=count` set. Malformed chunks are skipped.
pub fn extract(data: &[u8]) -> Option<IccProfile> {
    let mut chunks: BTreeMap<u8, &[u8]> = BTreeMap::new();

    for seg in segment::scan(data, EXTRACT_SCAN_LIMIT) {
        if seg.marker != APP2 {
            continue;
        }
        let Some(payload) = seg.payload(data) else {
            continue;
        };
        if !payload.starts_with(ICC_MARKER) {
            continue;
        }
        if payload.len() < ICC_HEADER_LEN {
            log_malformed(MalformedProfileSegment::TooShort { offset: seg.offset });
            continue;
        }

        let index = payload[12];
        let count = payload[13];
        if index == 0 || count == 0 || index > count {
            log_malformed(MalformedProfileSegment::BadSequence {
                offset: seg.offset,
                index,
                count,
            });
            continue;
        }

        chunks.insert(index, &payload[ICC_HEADER_LEN..]);

        if index == count {
            return assemble(&chunks, count);
        }
    }

    None
}

/// Concatenate chunks once the final one has been seen.
fn assemble(chunks: &BTreeMap<u8, &[u8]>, count: u8) -> Option<IccProfile> {
    let contiguous = chunks.len() == count as usize
        && chunks.keys().copied().eq(1..=count);
    if !contiguous {
        tracing::debug!(
            found = chunks.len(),
            expected = count,
            "incomplete ICC chunk set, profile treated as absent"
        );
        return None;
    }

    let bytes: Vec<u8> = chunks.values().flat_map(|c| c.iter().copied()).collect();
    Some(IccProfile::new(bytes))
}

fn log_malformed(segment: MalformedProfileSegment) {
    tracing::debug!(?segment, "skipping malformed ICC segment");
}

// ----------------------------------------------------------------------------
// Injection
// ----------------------------------------------------------------------------

/// Insert `profile` into a JPEG byte stream right after the SOI marker.
///
/// An empty profile returns the input unchanged. Any APP2 profile already in
/// the stream is left in place.
pub fn inject(data: &[u8], profile: &IccProfile) -> Result<Vec<u8>, InjectError> {
    if profile.is_empty() {
        return Ok(data.to_vec());
    }

    let soi = segment::scan(data, INJECT_SCAN_LIMIT)
        .find(|seg| seg.marker == SOI)
        .ok_or(InjectError::NoStartOfImage(INJECT_SCAN_LIMIT))?;

    let segments = profile.app2_segments()?;
    let split = soi.offset + 2;

    let mut out = Vec::with_capacity(data.len() + segments.len());
    out.extend_from_slice(&data[..split]);
    out.extend_from_slice(&segments);
    out.extend_from_slice(&data[split..]);
    Ok(out)
}

/// Rewrite the JPEG at `path` with `profile` embedded.
///
/// Returns `Ok(false)` without touching anything when the profile is empty or
/// the file is missing or unreadable.
pub fn inject_file(path: &Path, profile: &IccProfile) -> Result<bool, InjectError> {
    if profile.is_empty() {
        return Ok(false);
    }
    let Ok(data) = std::fs::read(path) else {
        return Ok(false);
    };
    let out = inject(&data, profile)?;
    std::fs::write(path, out)?;
    Ok(true)
}
