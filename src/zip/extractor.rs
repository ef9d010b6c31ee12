use flate2::read::DeflateDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};
use crate::io::RangeFetcher;

use super::index::ContainerIndex;
use super::parser::local_payload;
use super::structures::{CompressionMethod, EntryDescriptor};

/// Payloads above this size are inflated and checksummed off the async runtime.
const INLINE_DECODE_LIMIT: u64 = 256 * 1024;

/// Fetches entry spans, inflates them and verifies their checksums.
pub struct EntryExtractor {
    reader: Arc<dyn RangeFetcher>,
    index: Arc<ContainerIndex>,
    /// Raw spans fetched ahead of time, consumed on first extraction
    spans: Mutex<HashMap<String, Vec<u8>>>,
}

impl EntryExtractor {
    pub fn new(reader: Arc<dyn RangeFetcher>, index: Arc<ContainerIndex>) -> Self {
        Self {
            reader,
            index,
            spans: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<ContainerIndex> {
        &self.index
    }

    fn lookup(&self, name: &str) -> ArchiveResult<&EntryDescriptor> {
        self.index
            .get(name)
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))
    }

    fn take_span(&self, name: &str) -> Option<Vec<u8>> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Extract and verify one entry.
    pub async fn extract(&self, name: &str) -> ArchiveResult<Vec<u8>> {
        self.extract_with_read_ahead(name, 0).await
    }

    /// Extract one entry, widening the request over the contiguous entries
    /// around it while the whole span stays within `limit` bytes.
    ///
    /// Entries after it are taken first, then the ones before it. The extra
    /// spans are kept raw and verified when they are extracted.
    pub async fn extract_with_read_ahead(&self, name: &str, limit: u64) -> ArchiveResult<Vec<u8>> {
        let entry = self.lookup(name)?.clone();

        let span = match self.take_span(name) {
            Some(span) => {
                debug!(entry = name, "serving entry from read-ahead");
                span
            }
            None => self.fetch_span(&entry, limit).await?,
        };

        decode_entry(entry, span).await
    }

    async fn fetch_span(&self, entry: &EntryDescriptor, limit: u64) -> ArchiveResult<Vec<u8>> {
        let mut start = entry.lfh_offset;
        let mut end = entry.span_end;
        let mut extra = Vec::new();
        if limit > entry.span_len() {
            for next in self.index.followers(&entry.name) {
                if next.span_end - start > limit {
                    break;
                }
                end = next.span_end;
                extra.push(next.clone());
            }
            for prev in self.index.predecessors(&entry.name) {
                if end - prev.lfh_offset > limit {
                    break;
                }
                start = prev.lfh_offset;
                extra.push(prev.clone());
            }
        }

        let len = end - start;
        debug!(entry = %entry.name, offset = start, len, ahead = extra.len(), "fetching entry span");
        let mut bytes = self.reader.read_at(start, len).await?;
        if (bytes.len() as u64) < len {
            return Err(ArchiveError::Format(format!(
                "entry {} is truncated",
                entry.name
            )));
        }

        if !extra.is_empty() {
            let mut spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
            for other in &extra {
                let from = (other.lfh_offset - start) as usize;
                let to = (other.span_end - start) as usize;
                spans.insert(other.name.clone(), bytes[from..to].to_vec());
            }
        }

        let own = (entry.lfh_offset - start) as usize;
        bytes.truncate(own + entry.span_len() as usize);
        bytes.drain(..own);
        Ok(bytes)
    }
}

/// Inflate (if needed) and verify an entry span, off the runtime for large payloads.
async fn decode_entry(entry: EntryDescriptor, span: Vec<u8>) -> ArchiveResult<Vec<u8>> {
    if entry.uncompressed_size <= INLINE_DECODE_LIMIT {
        return decode_span(&entry, &span);
    }
    tokio::task::spawn_blocking(move || decode_span(&entry, &span))
        .await
        .map_err(|e| ArchiveError::Transport(format!("decode task failed: {e}")))?
}

/// Turn a raw span (local header onwards) into verified entry bytes.
pub fn decode_span(entry: &EntryDescriptor, span: &[u8]) -> ArchiveResult<Vec<u8>> {
    let payload = local_payload(entry, span)?;

    let data = match entry.compression_method {
        CompressionMethod::Stored => payload.to_vec(),
        CompressionMethod::Deflate => {
            // Read one byte past the recorded size so an oversized stream is caught below
            let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
            DeflateDecoder::new(payload)
                .take(entry.uncompressed_size + 1)
                .read_to_end(&mut out)
                .map_err(|e| {
                    ArchiveError::Format(format!("corrupt deflate stream in {}: {e}", entry.name))
                })?;
            out
        }
        CompressionMethod::Unknown(method) => {
            return Err(ArchiveError::UnsupportedCompression(method));
        }
    };

    let actual = crc32fast::hash(&data);
    if actual != entry.crc32 || data.len() as u64 != entry.uncompressed_size {
        return Err(ArchiveError::Integrity {
            name: entry.name.clone(),
            expected: entry.crc32,
            actual,
        });
    }

    Ok(data)
}
