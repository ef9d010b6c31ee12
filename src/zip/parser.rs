//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`RangeFetcher`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Fetch a trailing window large enough for the EOCD, the longest
//!    possible comment and the ZIP64 trailer records
//! 2. Locate the EOCD (and ZIP64 EOCD when needed) inside that window
//! 3. Fetch exactly the Central Directory span and parse every entry
//!
//! Index construction therefore costs two reads no matter how large the
//! archive is, and never touches entry payloads.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};
use crate::io::{RangeFetcher, Tail};

use super::index::ContainerIndex;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// Trailing window fetched to locate the directory: EOCD, the longest comment
/// and the ZIP64 locator plus ZIP64 EOCD that may precede it.
pub const TAIL_WINDOW: u64 = EndOfDirectory::SIZE as u64
    + MAX_COMMENT_SIZE
    + Zip64Locator::SIZE as u64
    + Zip64EndOfDirectory::MIN_SIZE as u64;

/// Location of the Central Directory as recorded in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    /// Absolute offset of the EOCD record
    pub eocd_offset: u64,
}

/// Low-level ZIP parser over a shared [`RangeFetcher`].
///
/// Typically used through [`ArchiveLoader`](crate::ArchiveLoader) rather than
/// directly.
pub struct ZipParser<R: RangeFetcher + ?Sized> {
    reader: Arc<R>,
    tail_window: u64,
}

impl<R: RangeFetcher + ?Sized> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            reader,
            tail_window: TAIL_WINDOW,
        }
    }

    /// Use a different trailing window. Archives whose comment does not fit
    /// in the window cannot be opened.
    pub fn with_tail_window(mut self, tail_window: u64) -> Self {
        self.tail_window = tail_window.max(EndOfDirectory::SIZE as u64);
        self
    }

    /// Read the trailer and the Central Directory and build the index.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::Format`] when the EOCD cannot be found in the trailing
    /// window or the directory is malformed; transport errors from the reader.
    pub async fn build_index(&self) -> ArchiveResult<ContainerIndex> {
        let tail = self.reader.read_tail(self.tail_window).await?;
        let location = self.locate_directory(&tail).await?;
        debug!(
            cd_offset = location.cd_offset,
            cd_size = location.cd_size,
            entries = location.total_entries,
            "central directory located"
        );

        if location.cd_offset.saturating_add(location.cd_size) > location.eocd_offset {
            return Err(ArchiveError::Format(
                "central directory lies outside the archive".to_string(),
            ));
        }

        // Read the entire Central Directory in one request
        let cd_data = self
            .reader
            .read_at(location.cd_offset, location.cd_size)
            .await?;
        if (cd_data.len() as u64) < location.cd_size {
            return Err(ArchiveError::Format(
                "central directory is truncated".to_string(),
            ));
        }

        let entries = parse_directory(&cd_data, location.total_entries)?;
        Ok(ContainerIndex::new(
            entries,
            tail.total_size,
            location.cd_offset,
            location.cd_size,
        ))
    }

    /// Find the EOCD inside the trailing window and resolve ZIP64 if needed.
    pub async fn locate_directory(&self, tail: &Tail) -> ArchiveResult<DirectoryLocation> {
        let pos = find_eocd(&tail.bytes).ok_or_else(|| {
            ArchiveError::Format("end of central directory not found".to_string())
        })?;
        let eocd = EndOfDirectory::from_bytes(&tail.bytes[pos..])?;
        let eocd_offset = tail.offset + pos as u64;

        if !eocd.is_zip64() {
            return Ok(DirectoryLocation {
                cd_offset: eocd.cd_offset as u64,
                cd_size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
                eocd_offset,
            });
        }

        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator = if pos >= Zip64Locator::SIZE {
            Zip64Locator::from_bytes(&tail.bytes[pos - Zip64Locator::SIZE..pos])?
        } else {
            let offset = eocd_offset
                .checked_sub(Zip64Locator::SIZE as u64)
                .ok_or_else(|| ArchiveError::Format("missing ZIP64 locator".to_string()))?;
            let buf = self
                .reader
                .read_at(offset, Zip64Locator::SIZE as u64)
                .await?;
            Zip64Locator::from_bytes(&buf)?
        };

        // The ZIP64 record must end before the locator that points at it
        let record_end = locator
            .eocd64_offset
            .checked_add(Zip64EndOfDirectory::MIN_SIZE as u64)
            .filter(|&end| end <= eocd_offset.saturating_sub(Zip64Locator::SIZE as u64));
        if record_end.is_none() {
            return Err(ArchiveError::Format(format!(
                "ZIP64 end record at {} does not precede its locator",
                locator.eocd64_offset
            )));
        }

        let eocd64 = match window_slice(tail, locator.eocd64_offset, Zip64EndOfDirectory::MIN_SIZE) {
            Some(bytes) => Zip64EndOfDirectory::from_bytes(bytes)?,
            None => {
                let buf = self
                    .reader
                    .read_at(locator.eocd64_offset, Zip64EndOfDirectory::MIN_SIZE as u64)
                    .await?;
                Zip64EndOfDirectory::from_bytes(&buf)?
            }
        };

        Ok(DirectoryLocation {
            cd_offset: eocd64.cd_offset,
            cd_size: eocd64.cd_size,
            total_entries: eocd64.total_entries,
            eocd_offset: locator.eocd64_offset,
        })
    }
}

/// Search backwards for an EOCD whose comment length matches the remaining bytes.
fn find_eocd(buf: &[u8]) -> Option<usize> {
    let last = buf.len().checked_sub(EndOfDirectory::SIZE)?;
    (0..=last).rev().find(|&i| {
        &buf[i..i + 4] == EndOfDirectory::SIGNATURE && {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            comment_len == buf.len() - i - EndOfDirectory::SIZE
        }
    })
}

/// Bytes `[offset, offset + len)` when they fall inside the fetched window.
fn window_slice(tail: &Tail, offset: u64, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset.checked_sub(tail.offset)?).ok()?;
    tail.bytes.get(start..start.checked_add(len)?)
}

/// Parse `total_entries` Central Directory File Headers.
pub fn parse_directory(cd_data: &[u8], total_entries: u64) -> ArchiveResult<Vec<EntryDescriptor>> {
    // Each header is at least 46 bytes; refuse counts the data cannot hold
    let max_entries = (cd_data.len() / CDFH_MIN_SIZE) as u64;
    if total_entries > max_entries {
        return Err(ArchiveError::Format(format!(
            "directory claims {} entries but holds at most {}",
            total_entries, max_entries
        )));
    }

    let mut entries = Vec::with_capacity(total_entries as usize);
    let mut cursor = Cursor::new(cd_data);
    for _ in 0..total_entries {
        let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
            ArchiveError::Io(_) => {
                ArchiveError::Format("truncated central directory record".to_string())
            }
            other => other,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> ArchiveResult<EntryDescriptor> {
    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(ArchiveError::Format(
            "invalid central directory file header".to_string(),
        ));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Use lossy conversion to handle non-UTF8 filenames gracefully
    let name = String::from_utf8_lossy(&file_name_bytes).to_string();
    let is_directory = name.ends_with('/');

    // ZIP64 uses extra field ID 0x0001
    let extra_field_end = cursor.position() + extra_field_length as u64;
    if extra_field_end > cursor.get_ref().len() as u64 {
        return Err(ArchiveError::Format(format!(
            "extra field of {} overruns the directory",
            name
        )));
    }

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;
        let field_end = (cursor.position() + field_size as u64).min(extra_field_end);

        if header_id == 0x0001 {
            // Fields are present only if corresponding header field is 0xFFFFFFFF
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    cursor.set_position(extra_field_end + file_comment_length as u64);

    Ok(EntryDescriptor {
        name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        span_end: 0,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}

/// Locate an entry's payload inside its fetched span.
///
/// The span starts at the Local File Header, whose name and extra field
/// lengths may differ from the directory record.
pub fn local_payload<'a>(entry: &EntryDescriptor, span: &'a [u8]) -> ArchiveResult<&'a [u8]> {
    if span.len() < LFH_SIZE || &span[0..4] != LFH_SIGNATURE {
        return Err(ArchiveError::Format(format!(
            "invalid local file header for {}",
            entry.name
        )));
    }

    let mut cursor = Cursor::new(&span[26..LFH_SIZE]);
    let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;

    // Data starts after: LFH (30 bytes) + filename + extra field
    let start = LFH_SIZE + file_name_length + extra_field_length;
    let end = start as u64 + entry.compressed_size;
    if end > span.len() as u64 {
        return Err(ArchiveError::Format(format!(
            "entry {} is truncated",
            entry.name
        )));
    }
    Ok(&span[start..end as usize])
}
