mod http;
mod keyed;
mod local;

pub use http::{HttpRangeReader, RangeFallback};
pub use keyed::KeyedReader;
pub use local::{LocalFileReader, MemoryReader};

use async_trait::async_trait;

use crate::error::ArchiveResult;

/// Trailing window of a resource together with the resource's total size.
#[derive(Debug, Clone)]
pub struct Tail {
    /// Total size of the resource in bytes
    pub total_size: u64,
    /// Absolute offset of the first byte in `bytes`
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Byte-range access to a local buffer, a local file or a remote URL.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Read `len` bytes starting at `offset`, clamped to the end of the resource.
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>>;

    /// Read the last `len` bytes (or the whole resource when it is shorter).
    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail>;

    /// Total size of the resource, when already known.
    fn size(&self) -> Option<u64>;

    /// Number of read requests issued so far.
    fn requests(&self) -> u64;
}

#[async_trait]
impl<F: RangeFetcher + ?Sized> RangeFetcher for std::sync::Arc<F> {
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        (**self).read_at(offset, len).await
    }

    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail> {
        (**self).read_tail(len).await
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn requests(&self) -> u64 {
        (**self).requests()
    }
}

/// Clamp `[offset, offset + len)` to a resource of `size` bytes.
pub(crate) fn clamp_range(offset: u64, len: u64, size: u64) -> (u64, u64) {
    let start = offset.min(size);
    let end = offset.saturating_add(len).min(size);
    (start, end)
}
