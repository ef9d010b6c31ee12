//! The archive facade consumed by the viewer.
//!
//! [`ArchiveLoader`] holds at most one open archive (a session). Opening
//! another archive replaces the session: its handles are released and every
//! asset type starts over as Unloaded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::assets::{AssetLoadCoordinator, AssetState, BlobRegistry, ExtractedAsset, HandleScope};
use crate::config::LoaderConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::io::{HttpRangeReader, KeyedReader, LocalFileReader, MemoryReader, RangeFetcher};
use crate::manifest::{
    Alignment, Annotation, AssetType, ContentInfo, Manifest, ManifestParser, ManifestView, Role,
    RoleEntry,
};
use crate::quality::{CapabilityProbe, QualityTier, QualityTierResolver, SystemProbe};
use crate::zip::{ContainerIndex, EntryExtractor, ZipParser};

/// Rendering-side callback turning extracted bytes into a displayed object.
///
/// Called again with a different entry of the same type when the quality
/// tier changes; the implementation replaces what it displays for that type.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, asset_type: AssetType, asset: &ExtractedAsset) -> anyhow::Result<()>;
}

/// Materializer that accepts everything, for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMaterializer;

#[async_trait]
impl Materializer for NoopMaterializer {
    async fn materialize(&self, _asset_type: AssetType, _asset: &ExtractedAsset) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStage {
    Extracting { entry: String },
    Materializing,
    Finished { ok: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub asset_type: AssetType,
    pub stage: LoadStage,
}

pub type ProgressFn = dyn Fn(&LoadProgress) + Send + Sync;

/// Outcome of [`ArchiveLoader::switch_quality_tier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSwitch {
    pub tier: QualityTier,
    pub changed: bool,
    pub swapped: Vec<AssetType>,
    pub failed: Vec<(AssetType, String)>,
}

/// Everything tied to one opened archive.
struct ArchiveSession {
    source: String,
    fetcher: Arc<dyn RangeFetcher>,
    extractor: EntryExtractor,
    manifest: ManifestParser,
    coordinator: AssetLoadCoordinator,
    handles: HandleScope,
    // Tier each materialized type was last shown at
    displayed: tokio::sync::Mutex<HashMap<AssetType, QualityTier>>,
}

/// Opens archives and serves their manifest, entries and assets.
pub struct ArchiveLoader {
    config: LoaderConfig,
    materializer: Arc<dyn Materializer>,
    probe: Arc<dyn CapabilityProbe>,
    resolver: QualityTierResolver,
    registry: Arc<BlobRegistry>,
    tier: Mutex<Option<QualityTier>>,
    session: RwLock<Option<Arc<ArchiveSession>>>,
}

impl ArchiveLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let resolver = QualityTierResolver::new(config.budgets);
        Self {
            config,
            materializer: Arc::new(NoopMaterializer),
            probe: Arc::new(SystemProbe),
            resolver,
            registry: Arc::new(BlobRegistry::new()),
            tier: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Share a blob registry with other loaders or the rendering layer
    pub fn with_registry(mut self, registry: Arc<BlobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlobRegistry> {
        &self.registry
    }

    fn session(&self) -> ArchiveResult<Arc<ArchiveSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ArchiveError::NoArchive)
    }

    // ── Opening ─────────────────────────────────────────────────

    /// Open an archive that is already fully in memory.
    pub async fn open_local(&self, bytes: impl Into<Arc<[u8]>>) -> ArchiveResult<()> {
        self.open_with(Arc::new(MemoryReader::new(bytes)), "memory")
            .await
    }

    /// Open an archive file with positional reads.
    pub async fn open_file(&self, path: &Path) -> ArchiveResult<()> {
        let reader = LocalFileReader::new(path)?;
        self.open_with(Arc::new(reader), &path.display().to_string())
            .await
    }

    /// Open a remote archive. Only the trailer and directory are fetched.
    pub async fn open_remote(&self, url: &str) -> ArchiveResult<()> {
        let reader = HttpRangeReader::new(url, self.config.http_timeout())?
            .with_fallback(self.config.range_fallback)
            .with_max_retries(self.config.max_retries);
        self.open_with(Arc::new(reader), url).await
    }

    /// Open an archive from any fetcher, replacing the current one on success.
    ///
    /// A failed open leaves the previously opened archive in place.
    pub async fn open_with(&self, fetcher: Arc<dyn RangeFetcher>, source: &str) -> ArchiveResult<()> {
        let fetcher: Arc<dyn RangeFetcher> = match &self.config.archive_key {
            Some(key) => Arc::new(KeyedReader::from_hex(fetcher, key)?),
            None => fetcher,
        };

        let index = ZipParser::new(Arc::clone(&fetcher))
            .with_tail_window(self.config.tail_window)
            .build_index()
            .await?;
        info!(source, entries = index.len(), size = index.archive_size(), "archive opened");

        let session = Arc::new(ArchiveSession {
            source: source.to_string(),
            extractor: EntryExtractor::new(Arc::clone(&fetcher), Arc::new(index)),
            fetcher,
            manifest: ManifestParser::new(),
            coordinator: AssetLoadCoordinator::new(),
            handles: HandleScope::new(Arc::clone(&self.registry)),
            displayed: tokio::sync::Mutex::new(HashMap::new()),
        });

        let previous = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session);
        if let Some(previous) = previous {
            let released = previous.handles.dispose();
            info!(source = %previous.source, released, "previous archive closed");
        }
        Ok(())
    }

    /// Close the current archive and release all of its handles.
    pub fn dispose(&self) {
        let previous = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            let released = previous.handles.dispose();
            info!(source = %previous.source, released, "archive disposed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.session().is_ok()
    }

    pub fn index(&self) -> ArchiveResult<Arc<ContainerIndex>> {
        Ok(Arc::clone(self.session()?.extractor.index()))
    }

    /// Read requests issued against the current archive
    pub fn requests(&self) -> u64 {
        self.session().map_or(0, |s| s.fetcher.requests())
    }

    // ── Manifest ────────────────────────────────────────────────

    pub async fn parse_manifest(&self) -> ArchiveResult<Arc<Manifest>> {
        let session = self.session()?;
        self.manifest_of(&session).await
    }

    async fn manifest_of(&self, session: &ArchiveSession) -> ArchiveResult<Arc<Manifest>> {
        session
            .manifest
            .parse(&session.extractor, self.config.read_ahead_bytes)
            .await
    }

    async fn with_view<T>(&self, f: impl FnOnce(ManifestView<'_>) -> T) -> ArchiveResult<T> {
        let session = self.session()?;
        let manifest = self.manifest_of(&session).await?;
        Ok(f(ManifestView::new(&manifest, session.extractor.index())))
    }

    pub async fn content_info(&self) -> ArchiveResult<ContentInfo> {
        self.with_view(|view| view.content_info()).await
    }

    pub async fn entries_by_role(&self, role: Role) -> ArchiveResult<Vec<RoleEntry>> {
        self.with_view(|view| view.entries_by_role(role)).await
    }

    pub async fn source_files(&self) -> ArchiveResult<Vec<String>> {
        self.with_view(|view| view.source_files()).await
    }

    pub async fn annotations(&self) -> ArchiveResult<Vec<Annotation>> {
        self.with_view(|view| view.annotations().to_vec()).await
    }

    pub async fn alignment(&self) -> ArchiveResult<Option<Alignment>> {
        self.with_view(|view| view.alignment().cloned()).await
    }

    /// Extract the archive's thumbnail, if the manifest names one.
    pub async fn thumbnail(&self) -> ArchiveResult<Option<ExtractedAsset>> {
        match self.with_view(|view| view.thumbnail()).await? {
            Some(row) => Ok(Some(self.extract(&row.entry.file_name).await?)),
            None => Ok(None),
        }
    }

    // ── Entries ─────────────────────────────────────────────────

    /// Extract a verified entry; repeated calls return the cached handle.
    pub async fn extract(&self, name: &str) -> ArchiveResult<ExtractedAsset> {
        let session = self.session()?;
        extract_in(&session, name).await
    }

    /// Hand one handle over to the caller so [`dispose`](Self::dispose)
    /// leaves its URL alive. Revoke it later through [`registry`](Self::registry).
    pub fn disown(&self, name: &str) -> Option<ExtractedAsset> {
        self.session().ok()?.handles.disown(name)
    }

    // ── Assets ──────────────────────────────────────────────────

    pub fn asset_state(&self, asset_type: AssetType) -> AssetState {
        self.session()
            .map_or(AssetState::Unloaded, |s| s.coordinator.state(asset_type))
    }

    /// Load one asset type once, joining an in-flight load if there is one.
    ///
    /// Returns false (never an error) when the archive lacks the type or any
    /// step fails; the type then stays in the Error state. A tier switch that
    /// happened while the load was running is applied before returning.
    pub async fn ensure_asset_loaded(&self, asset_type: AssetType, progress: Option<&ProgressFn>) -> bool {
        let Ok(session) = self.session() else {
            return false;
        };
        let tier = self.current_tier();
        let ok = session
            .coordinator
            .ensure_loaded(asset_type, || self.load_asset(&session, asset_type, tier, progress))
            .await;
        if ok {
            if let Err(e) = self.sync_variant(&session, asset_type).await {
                warn!(%asset_type, error = %e, "tier swap after load failed");
            }
        }
        report(progress, asset_type, LoadStage::Finished { ok });
        ok
    }

    async fn load_asset(
        &self,
        session: &ArchiveSession,
        asset_type: AssetType,
        tier: QualityTier,
        progress: Option<&ProgressFn>,
    ) -> ArchiveResult<()> {
        let manifest = self.manifest_of(session).await?;
        let view = ManifestView::new(&manifest, session.extractor.index());
        let name = variant_for(&view, asset_type, tier)
            .ok_or_else(|| ArchiveError::NotFound(format!("no {asset_type} entry in archive")))?;

        report(progress, asset_type, LoadStage::Extracting { entry: name.clone() });
        let asset = extract_in(session, &name).await?;

        report(progress, asset_type, LoadStage::Materializing);
        self.materializer
            .materialize(asset_type, &asset)
            .await
            .map_err(ArchiveError::Materialize)?;
        session.displayed.lock().await.insert(asset_type, tier);
        Ok(())
    }

    /// Load every other available type, one after another.
    pub async fn fill_remaining(&self, primary: Option<AssetType>) -> Vec<(AssetType, bool)> {
        let Ok(content) = self.content_info().await else {
            return Vec::new();
        };
        let mut results = Vec::new();
        for asset_type in AssetType::ALL {
            if Some(asset_type) == primary
                || !content.has(asset_type)
                || self.asset_state(asset_type) != AssetState::Unloaded
            {
                continue;
            }
            let ok = self.ensure_asset_loaded(asset_type, None).await;
            results.push((asset_type, ok));
        }
        results
    }

    /// Run [`fill_remaining`](Self::fill_remaining) on the runtime without
    /// blocking the caller.
    pub fn spawn_background_fill(
        self: &Arc<Self>,
        primary: Option<AssetType>,
    ) -> JoinHandle<Vec<(AssetType, bool)>> {
        let loader = Arc::clone(self);
        tokio::spawn(async move { loader.fill_remaining(primary).await })
    }

    // ── Quality tiers ───────────────────────────────────────────

    fn resolved_tier(&self, slot: &mut Option<QualityTier>) -> QualityTier {
        *slot.get_or_insert_with(|| {
            self.resolver
                .resolve_tier(self.config.requested_tier, self.probe.as_ref())
        })
    }

    /// The resolved tier, resolving the configured request on first use
    pub fn current_tier(&self) -> QualityTier {
        let mut slot = self.tier.lock().unwrap_or_else(PoisonError::into_inner);
        self.resolved_tier(&mut slot)
    }

    /// Rendering budget for the current tier
    pub fn budget(&self) -> u64 {
        self.resolver.budget_for(self.current_tier())
    }

    pub fn resolver(&self) -> &QualityTierResolver {
        &self.resolver
    }

    /// Switch tiers and swap every loaded type that has a proxy pair.
    ///
    /// A no-op when the request resolves to the current tier. Types that are
    /// not loaded yet pick the new tier up when they are first loaded, and a
    /// type still loading is swapped as soon as its load finishes.
    pub async fn switch_quality_tier(&self, requested: QualityTier) -> ArchiveResult<TierSwitch> {
        let tier = self.resolver.resolve_tier(requested, self.probe.as_ref());
        {
            let mut slot = self.tier.lock().unwrap_or_else(PoisonError::into_inner);
            if self.resolved_tier(&mut slot) == tier {
                return Ok(TierSwitch {
                    tier,
                    changed: false,
                    swapped: Vec::new(),
                    failed: Vec::new(),
                });
            }
            *slot = Some(tier);
        }
        info!(%tier, budget = self.resolver.budget_for(tier), "quality tier changed");

        let mut report = TierSwitch {
            tier,
            changed: true,
            swapped: Vec::new(),
            failed: Vec::new(),
        };
        let Ok(session) = self.session() else {
            return Ok(report);
        };

        for asset_type in AssetType::ALL {
            if session.coordinator.state(asset_type) != AssetState::Loaded {
                continue;
            }
            match self.sync_variant(&session, asset_type).await {
                Ok(true) => report.swapped.push(asset_type),
                Ok(false) => {}
                Err(e) => {
                    warn!(%asset_type, error = %e, "tier swap failed");
                    report.failed.push((asset_type, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Bring a materialized type in line with the current tier.
    ///
    /// Returns whether another entry was materialized. The displayed tier
    /// only advances on success, so a failed swap is retried next time.
    async fn sync_variant(&self, session: &ArchiveSession, asset_type: AssetType) -> ArchiveResult<bool> {
        let mut displayed = session.displayed.lock().await;
        let tier = self.current_tier();
        match displayed.get(&asset_type) {
            Some(&shown) if shown != tier => {}
            _ => return Ok(false),
        }

        let manifest = self.manifest_of(session).await?;
        let view = ManifestView::new(&manifest, session.extractor.index());
        let swapped = view.content_info().has_proxy_pair(asset_type);
        if swapped {
            self.swap_variant(session, &view, asset_type, tier).await?;
        }
        displayed.insert(asset_type, tier);
        Ok(swapped)
    }

    async fn swap_variant(
        &self,
        session: &ArchiveSession,
        view: &ManifestView<'_>,
        asset_type: AssetType,
        tier: QualityTier,
    ) -> ArchiveResult<()> {
        let name = variant_for(view, asset_type, tier)
            .ok_or_else(|| ArchiveError::NotFound(format!("no {asset_type} entry in archive")))?;
        let asset = extract_in(session, &name).await?;
        self.materializer
            .materialize(asset_type, &asset)
            .await
            .map_err(ArchiveError::Materialize)
    }
}

impl Drop for ArchiveLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn extract_in(session: &ArchiveSession, name: &str) -> ArchiveResult<ExtractedAsset> {
    if let Some(asset) = session.handles.get(name) {
        return Ok(asset);
    }
    let bytes = session.extractor.extract(name).await?;
    Ok(session.handles.track(name, bytes))
}

/// Entry to load for a type at a tier: Standard prefers the proxy, High the
/// full-resolution entry; either falls back to the other.
fn variant_for(view: &ManifestView<'_>, asset_type: AssetType, tier: QualityTier) -> Option<String> {
    let full = view.primary(asset_type.role());
    let proxy = asset_type.proxy_role().and_then(|role| view.primary(role));
    let chosen = match tier {
        QualityTier::Standard => proxy.or(full),
        _ => full.or(proxy),
    };
    chosen.map(|row| row.entry.file_name)
}

fn report(progress: Option<&ProgressFn>, asset_type: AssetType, stage: LoadStage) {
    if let Some(progress) = progress {
        progress(&LoadProgress { asset_type, stage });
    }
}
