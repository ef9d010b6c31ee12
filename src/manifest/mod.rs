//! Manifest decoding and read-only projections.
//!
//! The manifest is a JSON entry stored under [`MANIFEST_ENTRY`]. Writers have
//! used several key casings over time, so every key is normalized to
//! snake_case before the document is mapped onto [`Manifest`].

mod model;
mod normalize;
mod roles;

pub use model::*;
pub use normalize::{lift_identity, normalize_keys, to_snake_case};
pub use roles::{AssetType, ContentInfo, Role};

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::zip::{ContainerIndex, EntryExtractor};

/// Conventional name of the manifest entry
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Directory prefix for source files that may have no manifest row
pub const SOURCES_PREFIX: &str = "sources/";

/// Decode manifest bytes: JSON, key normalization, identity lifting, typing.
pub fn parse_manifest(bytes: &[u8]) -> ArchiveResult<Manifest> {
    let raw: serde_json::Value = serde_json::from_slice(bytes)?;
    if !raw.is_object() {
        return Err(ArchiveError::Format(
            "manifest root is not an object".to_string(),
        ));
    }
    let mut normalized = normalize_keys(raw);
    lift_identity(&mut normalized);
    Ok(serde_json::from_value(normalized)?)
}

/// Extracts and parses the manifest once per archive.
#[derive(Default)]
pub struct ManifestParser {
    parsed: OnceCell<Arc<Manifest>>,
}

impl ManifestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the manifest, or return the cached result of an earlier call.
    ///
    /// `read_ahead` widens the manifest request over the entries stored right
    /// after it, see [`EntryExtractor::extract_with_read_ahead`].
    pub async fn parse(
        &self,
        extractor: &EntryExtractor,
        read_ahead: u64,
    ) -> ArchiveResult<Arc<Manifest>> {
        self.parsed
            .get_or_try_init(|| async {
                let bytes = extractor
                    .extract_with_read_ahead(MANIFEST_ENTRY, read_ahead)
                    .await?;
                let manifest = parse_manifest(&bytes)?;
                debug!(
                    entries = manifest.data_entries.len(),
                    annotations = manifest.annotations.len(),
                    "manifest parsed"
                );
                Ok::<_, ArchiveError>(Arc::new(manifest))
            })
            .await
            .cloned()
    }

    /// The parsed manifest, if [`parse`](Self::parse) has succeeded
    pub fn get(&self) -> Option<Arc<Manifest>> {
        self.parsed.get().cloned()
    }
}

/// A manifest row resolved against the archive directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleEntry {
    pub key: String,
    pub role: Role,
    pub index: u32,
    pub entry: DataEntry,
}

/// Pure projections over a manifest and the index it was read from.
#[derive(Clone, Copy)]
pub struct ManifestView<'a> {
    manifest: &'a Manifest,
    index: &'a ContainerIndex,
}

impl<'a> ManifestView<'a> {
    pub fn new(manifest: &'a Manifest, index: &'a ContainerIndex) -> Self {
        Self { manifest, index }
    }

    pub fn manifest(&self) -> &'a Manifest {
        self.manifest
    }

    /// Rows of `role` whose file exists in the archive, ordered by index.
    pub fn entries_by_role(&self, role: Role) -> Vec<RoleEntry> {
        let mut rows: Vec<RoleEntry> = self
            .manifest
            .data_entries
            .iter()
            .filter_map(|(key, entry)| {
                let (parsed, index) = Role::parse_key(key)?;
                (parsed == role).then(|| RoleEntry {
                    key: key.clone(),
                    role,
                    index,
                    entry: entry.clone(),
                })
            })
            .filter(|row| {
                let present = self.index.contains(&row.entry.file_name);
                if !present {
                    warn!(key = %row.key, file = %row.entry.file_name, "manifest references a missing entry");
                }
                present
            })
            .collect();
        rows.sort_by_key(|row| row.index);
        rows
    }

    /// The lowest-index present row for `role`
    pub fn primary(&self, role: Role) -> Option<RoleEntry> {
        self.entries_by_role(role).into_iter().next()
    }

    fn has(&self, role: Role) -> bool {
        self.manifest.data_entries.iter().any(|(key, entry)| {
            Role::parse_key(key).is_some_and(|(r, _)| r == role)
                && self.index.contains(&entry.file_name)
        })
    }

    pub fn content_info(&self) -> ContentInfo {
        ContentInfo {
            has_splat: self.has(Role::Scene),
            has_mesh: self.has(Role::Mesh),
            has_pointcloud: self.has(Role::Pointcloud),
            has_thumbnail: self.has(Role::Thumbnail),
            has_scene_proxy: self.has(Role::SceneProxy),
            has_mesh_proxy: self.has(Role::MeshProxy),
            has_source_files: !self.source_files().is_empty(),
            has_images: self.has(Role::Image),
        }
    }

    pub fn thumbnail(&self) -> Option<RoleEntry> {
        self.primary(Role::Thumbnail)
    }

    /// Source files: manifest rows first, then directory entries under
    /// `sources/` that no row mentions.
    pub fn source_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries_by_role(Role::Source)
            .into_iter()
            .map(|row| row.entry.file_name)
            .collect();
        for entry in self.index.entries() {
            if !entry.is_directory
                && entry.name.starts_with(SOURCES_PREFIX)
                && !names.contains(&entry.name)
            {
                names.push(entry.name.clone());
            }
        }
        names
    }

    pub fn annotations(&self) -> &'a [Annotation] {
        &self.manifest.annotations
    }

    pub fn alignment(&self) -> Option<&'a Alignment> {
        self.manifest.alignment.as_ref()
    }
}
