//! # scanzip
//!
//! Lazy loader for 3D scan archives.
//!
//! A scan archive is a ZIP container holding a `manifest.json` plus the
//! scene, mesh and point-cloud assets it describes. Remote archives are read
//! with HTTP Range requests, so listing an archive costs two requests and each
//! asset costs one more, no matter how large the archive is.
//!
//! ## Features
//!
//! - Directory from the trailer and central directory only, ZIP64 included
//! - STORED and DEFLATE entries, CRC-32 verified before they are handed out
//! - Manifest key normalization across writer generations
//! - Single-flight asset loading with a background fill of the rest
//! - Device-driven quality tiers with proxy/full variant swapping
//! - Scoped blob handles released together when an archive is replaced
//!
//! ## Example
//!
//! ```no_run
//! use scanzip::{ArchiveLoader, AssetType, LoaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loader = ArchiveLoader::new(LoaderConfig::default());
//!     loader.open_remote("https://example.com/scan.zip").await?;
//!
//!     let content = loader.content_info().await?;
//!     if let Some(thumb) = loader.thumbnail().await? {
//!         println!("thumbnail {} ({} bytes)", thumb.url, thumb.len());
//!     }
//!     if content.has_splat {
//!         loader.ensure_asset_loaded(AssetType::Splat, None).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod loader;
pub mod manifest;
pub mod quality;
pub mod zip;

pub use assets::{AssetLoadCoordinator, AssetState, BlobRegistry, ExtractedAsset, HandleScope};
pub use cli::Cli;
pub use config::LoaderConfig;
pub use error::{ArchiveError, ArchiveResult};
pub use io::{HttpRangeReader, KeyedReader, LocalFileReader, MemoryReader, RangeFallback, RangeFetcher};
pub use loader::{
    ArchiveLoader, LoadProgress, LoadStage, Materializer, NoopMaterializer, ProgressFn, TierSwitch,
};
pub use manifest::{AssetType, ContentInfo, Manifest, Role, RoleEntry};
pub use quality::{CapabilityProbe, DeviceCapabilities, QualityTier, QualityTierResolver};
pub use zip::{ContainerIndex, EntryDescriptor, EntryExtractor, ZipParser};
