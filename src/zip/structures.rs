use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ArchiveError, ArchiveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CompressionMethod::Unknown(_))
    }
}

/// Cursor over the body of a fixed-size record after its signature is checked.
fn record<'a>(
    data: &'a [u8],
    signature: &[u8],
    size: usize,
    what: &str,
) -> ArchiveResult<Cursor<&'a [u8]>> {
    if data.len() < size || &data[..signature.len()] != signature {
        return Err(ArchiveError::Format(format!("invalid {what}")));
    }
    Ok(Cursor::new(&data[signature.len()..size]))
}

/// Classic end-of-directory record. Only the fields the reader needs are kept.
#[derive(Debug, Clone, Copy)]
pub struct EndOfDirectory {
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    /// Fixed part, without the trailing comment
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ArchiveResult<Self> {
        let mut c = record(data, Self::SIGNATURE, Self::SIZE, "end of central directory")?;
        // Disk numbers: multi-disk archives are not supported
        c.set_position(4);
        Ok(Self {
            entries_on_disk: c.read_u16::<LittleEndian>()?,
            total_entries: c.read_u16::<LittleEndian>()?,
            cd_size: c.read_u32::<LittleEndian>()?,
            cd_offset: c.read_u32::<LittleEndian>()?,
        })
    }

    /// Writers saturate any field that overflowed and move the real value to
    /// the ZIP64 record.
    pub fn is_zip64(&self) -> bool {
        self.entries_on_disk == u16::MAX
            || self.total_entries == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX
    }
}

/// Points at the ZIP64 end record; sits right before the classic record.
#[derive(Debug, Clone, Copy)]
pub struct Zip64Locator {
    pub eocd64_offset: u64,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ArchiveResult<Self> {
        let mut c = record(data, Self::SIGNATURE, Self::SIZE, "ZIP64 locator")?;
        c.set_position(4);
        Ok(Self {
            eocd64_offset: c.read_u64::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Zip64EndOfDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    /// Fixed part, without the extensible data sector
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> ArchiveResult<Self> {
        let mut c = record(
            data,
            Self::SIGNATURE,
            Self::MIN_SIZE,
            "ZIP64 end of central directory",
        )?;
        // record size, versions, disk numbers, entries on this disk
        c.set_position(8 + 2 + 2 + 4 + 4 + 8);
        Ok(Self {
            total_entries: c.read_u64::<LittleEndian>()?,
            cd_size: c.read_u64::<LittleEndian>()?,
            cd_offset: c.read_u64::<LittleEndian>()?,
        })
    }
}

pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// One named, checksummed byte span inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    /// Offset of the local file header
    pub lfh_offset: u64,
    /// End of the entry's span: the next local header or the directory start
    pub span_end: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl EntryDescriptor {
    /// Bytes covering the local header, payload and any data descriptor
    pub fn span_len(&self) -> u64 {
        self.span_end.saturating_sub(self.lfh_offset)
    }

    /// DOS date as (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let d = self.last_mod_date;
        (1980 + (d >> 9), ((d >> 5) & 0x0F) as u8, (d & 0x1F) as u8)
    }

    /// DOS time as (hour, minute, second); seconds have 2s resolution
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let t = self.last_mod_time;
        ((t >> 11) as u8, ((t >> 5) & 0x3F) as u8, ((t & 0x1F) * 2) as u8)
    }
}
