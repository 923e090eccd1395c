//! JPEG byte-stream handling.
//!
//! Only the marker structure is touched here; pixel data is decoded and
//! encoded by the `image` crate in the backends.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `segment` | Lazy marker-segment scanner with an iteration cap |
//! | `icc` | Reassemble and re-embed APP2 ICC profile chunks |

pub mod icc;
pub mod segment;

pub use icc::{IccProfile, InjectError, extract, inject, inject_file};
pub use segment::{MarkerSegment, SegmentScanner, scan};
