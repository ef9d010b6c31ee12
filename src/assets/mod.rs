//! Asset load coordination and handle ownership.

mod coordinator;
mod handle;

pub use coordinator::{AssetLoadCoordinator, AssetState};
pub use handle::{BlobRegistry, ExtractedAsset, HandleScope};
