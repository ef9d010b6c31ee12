//! ZIP container indexing and entry extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP format records (EOCD, ZIP64 trailer, entry descriptors)
//! - [`parser`]: trailer and Central Directory parsing over a [`RangeFetcher`](crate::io::RangeFetcher)
//! - [`index`]: the immutable [`ContainerIndex`] built once per opened archive
//! - [`extractor`]: span fetching, inflate and CRC-32 verification
//!
//! ## Reading order
//!
//! Entries are found through the trailer, never by scanning local headers:
//! the end-of-directory record (plus the ZIP64 records when a field is
//! saturated) gives the directory span, and the directory gives every local
//! header offset. Each entry span ends where the next local header (or the
//! directory) begins, so one read covers one entry.
//!
//! Only stored and deflate entries of single-disk archives are read;
//! encrypted payloads fail CRC verification.

mod extractor;
mod index;
mod parser;
mod structures;

pub use extractor::{EntryExtractor, decode_span};
pub use index::ContainerIndex;
pub use parser::{DirectoryLocation, TAIL_WINDOW, ZipParser, local_payload, parse_directory};
pub use structures::*;
