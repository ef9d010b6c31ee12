use async_trait::async_trait;

use super::{RangeFetcher, Tail};
use crate::error::{ArchiveError, ArchiveResult};

/// Reader for archives obfuscated with a repeating XOR key.
///
/// Byte `i` of the resource is stored as `plain[i] ^ key[i % key.len()]`, so
/// decoding depends only on the absolute offset and any range can be read
/// independently.
pub struct KeyedReader<F> {
    inner: F,
    key: Vec<u8>,
}

impl<F: RangeFetcher> KeyedReader<F> {
    pub fn new(inner: F, key: Vec<u8>) -> ArchiveResult<Self> {
        if key.is_empty() {
            return Err(ArchiveError::Config("archive key must not be empty".to_string()));
        }
        Ok(Self { inner, key })
    }

    /// Build from a hex-encoded key such as the one in `LoaderConfig::archive_key`
    pub fn from_hex(inner: F, key_hex: &str) -> ArchiveResult<Self> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| ArchiveError::Config(format!("archive key is not valid hex: {e}")))?;
        Self::new(inner, key)
    }

    fn decode(&self, offset: u64, buf: &mut [u8]) {
        let key_len = self.key.len() as u64;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= self.key[((offset + i as u64) % key_len) as usize];
        }
    }
}

#[async_trait]
impl<F: RangeFetcher> RangeFetcher for KeyedReader<F> {
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        let mut bytes = self.inner.read_at(offset, len).await?;
        self.decode(offset, &mut bytes);
        Ok(bytes)
    }

    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail> {
        let mut tail = self.inner.read_tail(len).await?;
        self.decode(tail.offset, &mut tail.bytes);
        Ok(tail)
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn requests(&self) -> u64 {
        self.inner.requests()
    }
}
