//! Error types for archive reading and asset loading.

use thiserror::Error;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that can occur while opening, indexing or extracting an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Directory marker missing, malformed header or truncated directory.
    #[error("invalid archive format: {0}")]
    Format(String),

    /// Decompressed bytes do not match the recorded checksum or length.
    #[error("integrity check failed for {name}: expected crc {expected:08x}, got {actual:08x}")]
    Integrity {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// Entry or role absent from the archive.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entry uses a compression method other than stored or deflate.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Range request failed for a reason other than an HTTP client error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered a ranged request without partial content.
    #[error("server does not honour range requests (status {status})")]
    RangeNotSupported { status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest entry is not valid JSON or does not fit the schema.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The rendering-side callback rejected the extracted bytes.
    #[error("materialization failed: {0}")]
    Materialize(anyhow::Error),

    /// Operation requires an open archive.
    #[error("no archive is open")]
    NoArchive,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ArchiveError {
    pub fn is_format(&self) -> bool {
        matches!(self, ArchiveError::Format(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, ArchiveError::Integrity { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_))
    }

    /// Returns true for failures of the underlying fetch primitive.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ArchiveError::Transport(_)
                | ArchiveError::RangeNotSupported { .. }
                | ArchiveError::Http(_)
                | ArchiveError::Io(_)
        )
    }
}
