//! Lazy JPEG marker-segment scanner.
//!
//! Walks a byte buffer looking for `0xFF` marker prefixes and yields one
//! [`MarkerSegment`] per marker found. Nothing is copied: a segment is just a
//! marker type, an offset, and the declared length, and callers slice the
//! payload out of the original buffer with [`MarkerSegment::payload`].
//!
//! ## Advancing
//!
//! ```text
//! FF D8                    stand-alone   → advance 2
//! FF E2 LL LL <payload>    parameterised → advance 2 + LLLL
//! FF ?? (anything else)    unknown       → advance 2
//! ```
//!
//! The big-endian length field counts itself (2 bytes) plus the payload, but
//! not the `FF xx` marker. Entropy-coded data after SOS is not skipped
//! specially: stuffed `FF 00` pairs are reported as unknown markers and
//! stepped over two bytes at a time.
//!
//! Every scan is bounded by an iteration cap so malformed input (for example a
//! buffer made entirely of `0xFF`) always terminates.

/// Iteration cap used when reading an embedded profile.
pub const EXTRACT_SCAN_LIMIT: usize = 1000;

/// Iteration cap used when looking for the start-of-image marker.
pub const INJECT_SCAN_LIMIT: usize = 100;

/// Marker prefix byte.
pub const MARKER_PREFIX: u8 = 0xFF;

/// Start of image.
pub const SOI: u8 = 0xD8;
/// End of image.
pub const EOI: u8 = 0xD9;
/// APP2, the segment that carries ICC profile chunks.
pub const APP2: u8 = 0xE2;

/// How the scanner steps over a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// No length field (SOI, EOI, RSTn, TEM).
    StandAlone,
    /// Followed by a big-endian length that includes its own two bytes.
    Parameterised,
    /// Not a marker the scanner knows; stepped over as two bytes.
    Unknown,
}

/// Classify a marker type byte.
pub fn marker_kind(marker: u8) -> MarkerKind {
    match marker {
        SOI | EOI | 0x01 | 0xD0..=0xD7 => MarkerKind::StandAlone,
        // SOF0-SOF15 (including DHT 0xC4 and DAC 0xCC), DQT, DRI, SOS
        0xC0..=0xCF | 0xDA | 0xDB | 0xDD => MarkerKind::Parameterised,
        // APP0-APP15, COM
        0xE0..=0xEF | 0xFE => MarkerKind::Parameterised,
        _ => MarkerKind::Unknown,
    }
}

/// One marker found by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerSegment {
    /// Marker type byte (the byte after `0xFF`).
    pub marker: u8,
    /// Position of the `0xFF` prefix in the scanned buffer.
    pub offset: usize,
    /// Declared segment length (includes the two length bytes).
    /// Zero for stand-alone and unknown markers.
    pub length: u16,
}

impl MarkerSegment {
    /// Offset of the first payload byte (after marker and length field).
    pub fn data_offset(&self) -> usize {
        self.offset + 4
    }

    /// Payload size declared by the length field.
    pub fn data_size(&self) -> usize {
        (self.length as usize).saturating_sub(2)
    }

    /// Payload bytes, or `None` when the declared length runs past the end
    /// of the buffer.
    pub fn payload<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        if self.length < 2 {
            return None;
        }
        let start = self.data_offset();
        let end = start + self.data_size();
        data.get(start..end)
    }

    /// Total bytes the segment occupies, marker included.
    fn span(&self) -> usize {
        match marker_kind(self.marker) {
            MarkerKind::Parameterised => self.length as usize + 2,
            MarkerKind::StandAlone | MarkerKind::Unknown => 2,
        }
    }
}

/// Iterator over the marker segments of a buffer.
///
/// Finite and single-pass; call [`scan`] again to rescan.
#[derive(Debug, Clone)]
pub struct SegmentScanner<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
}

/// Start scanning `data`, giving up after `limit` markers.
pub fn scan(data: &[u8], limit: usize) -> SegmentScanner<'_> {
    SegmentScanner {
        data,
        pos: 0,
        remaining: limit,
    }
}

impl Iterator for SegmentScanner<'_> {
    type Item = MarkerSegment;

    fn next(&mut self) -> Option<MarkerSegment> {
        if self.remaining == 0 || self.pos >= self.data.len() {
            return None;
        }
        self.remaining -= 1;

        let found = self.data[self.pos..]
            .iter()
            .position(|&b| b == MARKER_PREFIX)?;
        let offset = self.pos + found;

        // A prefix with no type byte after it ends the scan.
        let Some(&marker) = self.data.get(offset + 1) else {
            self.pos = self.data.len();
            return None;
        };

        let length = match marker_kind(marker) {
            MarkerKind::Parameterised => {
                let Some(len_bytes) = self.data.get(offset + 2..offset + 4) else {
                    self.pos = self.data.len();
                    return None;
                };
                u16::from_be_bytes([len_bytes[0], len_bytes[1]])
            }
            MarkerKind::StandAlone | MarkerKind::Unknown => 0,
        };

        let segment = MarkerSegment {
            marker,
            offset,
            length,
        };
        self.pos = offset + segment.span();
        Some(segment)
    }
}
