use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::{RangeFetcher, Tail, clamp_range};
use crate::error::{ArchiveError, ArchiveResult};

/// What to do when a server answers a ranged request with the whole body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeFallback {
    /// Fail the read with [`ArchiveError::RangeNotSupported`]
    #[default]
    Fail,
    /// Keep the full body and serve every later read from memory
    FullDownload,
}

/// Body of one ranged response.
struct RangeResponse {
    start: u64,
    bytes: Vec<u8>,
}

/// HTTP Range reader for remote archives
///
/// No request is sent on construction. The total size is learned from the
/// `Content-Range` header of the first response, normally the suffix request
/// issued by [`RangeFetcher::read_tail`].
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: OnceLock<u64>,
    full_body: OnceLock<Arc<[u8]>>,
    transferred_bytes: AtomicU64,
    requests: AtomicU64,
    max_retry: u32,
    fallback: RangeFallback,
}

impl HttpRangeReader {
    /// Create a reader with its own client and the given request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> ArchiveResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            size: OnceLock::new(),
            full_body: OnceLock::new(),
            transferred_bytes: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            max_retry: 0,
            fallback: RangeFallback::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: RangeFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Retry connect and timeout failures up to `max_retry` times
    pub fn with_max_retries(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Send one ranged GET. Returns `None` when the full body was kept as a fallback.
    async fn send_range(&self, range: &str) -> ArchiveResult<Option<RangeResponse>> {
        let mut retry_count = 0;

        let resp = loop {
            self.requests.fetch_add(1, Ordering::Relaxed);
            debug!(url = %self.url, range, "range request");

            match self
                .client
                .get(&self.url)
                .header(reqwest::header::RANGE, range)
                .send()
                .await
            {
                Ok(resp) => break resp,
                Err(e) if (e.is_timeout() || e.is_connect()) && retry_count < self.max_retry => {
                    retry_count += 1;
                    warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = resp.status();
        match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = resp
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range)
                    .ok_or_else(|| {
                        ArchiveError::Transport(
                            "partial response without a usable Content-Range".to_string(),
                        )
                    })?;
                let (start, _end, total) = content_range;
                if let Some(total) = total {
                    let _ = self.size.set(total);
                }

                let bytes = resp.bytes().await?.to_vec();
                self.transferred_bytes
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(Some(RangeResponse { start, bytes }))
            }
            StatusCode::OK => match self.fallback {
                RangeFallback::Fail => Err(ArchiveError::RangeNotSupported {
                    status: status.as_u16(),
                }),
                RangeFallback::FullDownload => {
                    warn!(url = %self.url, "server ignored Range, keeping full download");
                    let body: Arc<[u8]> = resp.bytes().await?.to_vec().into();
                    self.transferred_bytes
                        .fetch_add(body.len() as u64, Ordering::Relaxed);
                    let _ = self.size.set(body.len() as u64);
                    let _ = self.full_body.set(body);
                    Ok(None)
                }
            },
            _ => Err(ArchiveError::Transport(format!(
                "HTTP request failed with status: {}",
                status
            ))),
        }
    }

    fn tail_of_full_body(&self, len: u64) -> Option<Tail> {
        let total_size = self.full_body.get()?.len() as u64;
        let offset = total_size.saturating_sub(len);
        Some(Tail {
            total_size,
            offset,
            bytes: self.slice_full_body(offset, len)?,
        })
    }

    fn slice_full_body(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let body = self.full_body.get()?;
        let (start, end) = clamp_range(offset, len, body.len() as u64);
        Some(body[start as usize..end as usize].to_vec())
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeReader {
    async fn read_at(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        if let Some(bytes) = self.slice_full_body(offset, len) {
            return Ok(bytes);
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut end = offset + len;
        if let Some(&size) = self.size.get() {
            if offset >= size {
                return Ok(Vec::new());
            }
            end = end.min(size);
        }

        let mut buf = Vec::with_capacity((end - offset) as usize);
        while offset + (buf.len() as u64) < end {
            let current_start = offset + buf.len() as u64;
            let range = format!("bytes={}-{}", current_start, end - 1);

            let Some(resp) = self.send_range(&range).await? else {
                let rest = self.slice_full_body(current_start, end - current_start);
                buf.extend_from_slice(&rest.unwrap_or_default());
                break;
            };
            if resp.start != current_start || resp.bytes.is_empty() {
                return Err(ArchiveError::Transport(format!(
                    "server returned range starting at {} for request {}",
                    resp.start, range
                )));
            }

            let wanted = (end - current_start) as usize;
            buf.extend_from_slice(&resp.bytes[..resp.bytes.len().min(wanted)]);

            // The first response may reveal a shorter resource than requested
            match self.size.get() {
                Some(&size) => end = end.min(size),
                // Unknown total: a short body is taken as the end of the resource
                None if resp.bytes.len() < wanted => break,
                None => {}
            }
        }

        Ok(buf)
    }

    async fn read_tail(&self, len: u64) -> ArchiveResult<Tail> {
        if let Some(tail) = self.tail_of_full_body(len) {
            return Ok(tail);
        }

        match self.send_range(&format!("bytes=-{}", len)).await? {
            Some(resp) => {
                let total_size = self.size.get().copied().ok_or_else(|| {
                    ArchiveError::Transport("server did not report the resource size".to_string())
                })?;
                Ok(Tail {
                    total_size,
                    offset: resp.start,
                    bytes: resp.bytes,
                })
            }
            None => self.tail_of_full_body(len).ok_or_else(|| {
                ArchiveError::Transport("full download fallback kept no body".to_string())
            }),
        }
    }

    fn size(&self) -> Option<u64> {
        self.size.get().copied()
    }

    fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Parse `bytes <start>-<end>/<total|*>`.
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}
