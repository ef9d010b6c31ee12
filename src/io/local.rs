use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{RangeFetcher, Tail, clamp_range};
use crate::error::ArchiveResult;

/// Reader over an archive that is already fully in memory
#[derive(Debug)]
pub struct MemoryReader {
    data: Arc<[u8]>,
    reads: AtomicU64,
}

impl MemoryReader {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            reads: AtomicU64::new(0),
        }
    }

    fn slice(&self, offset: u64, len: u64) -> Vec<u8> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let (start, end) = clamp_range(offset, len, self.data.len() as u64);
        self.data[start as usize..end as usize].to_vec()
    }
}

#[async_trait]
impl RangeFetcher for MemoryReader {
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        Ok(self.slice(offset, len))
    }

    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail> {
        let total_size = self.data.len() as u64;
        let offset = total_size.saturating_sub(len);
        Ok(Tail {
            total_size,
            offset,
            bytes: self.slice(offset, len),
        })
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn requests(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

/// Local file reader with positional reads; the file stays open until dropped
pub struct LocalFileReader {
    file: std::fs::File,
    size: u64,
    reads: AtomicU64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> ArchiveResult<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            reads: AtomicU64::new(0),
        })
    }

    fn read_span(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let (start, end) = clamp_range(offset, len, self.size);
        let mut buf = vec![0u8; (end - start) as usize];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, start)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut filled = 0;
            while filled < buf.len() {
                let n = self.file.seek_read(&mut buf[filled..], start + filled as u64)?;
                if n == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                filled += n;
            }
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut buf)?;
        }

        Ok(buf)
    }
}

#[async_trait]
impl RangeFetcher for LocalFileReader {
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        self.read_span(offset, len)
    }

    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail> {
        let offset = self.size.saturating_sub(len);
        Ok(Tail {
            total_size: self.size,
            offset,
            bytes: self.read_span(offset, len)?,
        })
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn requests(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}
