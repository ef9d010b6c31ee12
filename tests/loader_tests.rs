mod common;

use common::{RecordingMaterializer, THUMBNAIL, ZipBuilder, mesh_only_archive, scan_archive};
use pretty_assertions::assert_eq;
use scanzip::{
    ArchiveError, ArchiveLoader, AssetState, AssetType, BlobRegistry, DeviceCapabilities,
    LoadProgress, LoadStage, LoaderConfig, ProgressFn, QualityTier,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config(tier: QualityTier) -> LoaderConfig {
    LoaderConfig {
        requested_tier: tier,
        ..Default::default()
    }
}

fn loader_with(materializer: &Arc<RecordingMaterializer>, tier: QualityTier) -> ArchiveLoader {
    ArchiveLoader::new(config(tier)).with_materializer(materializer.clone())
}

fn weak_device() -> DeviceCapabilities {
    DeviceCapabilities {
        memory_gb: Some(2.0),
        logical_cores: Some(2),
        screen_width: Some(800),
        max_texture_size: Some(4096),
        is_mobile: Some(true),
    }
}

// ── Opening and lifecycle ───────────────────────────────────────

#[tokio::test]
async fn operations_need_an_open_archive() {
    let loader = ArchiveLoader::new(LoaderConfig::default());

    assert!(!loader.is_open());
    assert!(matches!(loader.index(), Err(ArchiveError::NoArchive)));
    assert!(matches!(
        loader.parse_manifest().await,
        Err(ArchiveError::NoArchive)
    ));
    assert!(!loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(loader.asset_state(AssetType::Mesh), AssetState::Unloaded);
    assert_eq!(loader.requests(), 0);
}

#[tokio::test]
async fn thumbnail_after_open_costs_three_reads() {
    let loader = ArchiveLoader::new(LoaderConfig::default());
    loader.open_local(scan_archive()).await.unwrap();
    assert_eq!(loader.requests(), 2);

    let thumb = loader.thumbnail().await.unwrap().unwrap();
    assert_eq!(thumb.bytes(), THUMBNAIL);
    assert_eq!(thumb.entry_name, "preview.jpg");
    assert_eq!(loader.requests(), 3);
}

#[tokio::test]
async fn extract_returns_cached_handle() {
    let loader = ArchiveLoader::new(LoaderConfig::default());
    loader.open_local(scan_archive()).await.unwrap();

    let first = loader.extract("assets/mesh.glb").await.unwrap();
    let requests = loader.requests();
    let second = loader.extract("assets/mesh.glb").await.unwrap();

    assert_eq!(first.url, second.url);
    assert_eq!(loader.requests(), requests);
    assert!(first.url.starts_with("blob:scanzip/"));
    assert_eq!(
        loader.registry().resolve(&first.url).as_deref(),
        Some(first.bytes())
    );
}

#[tokio::test]
async fn dispose_revokes_all_but_disowned_handles() {
    let registry = Arc::new(BlobRegistry::new());
    let loader = ArchiveLoader::new(LoaderConfig::default()).with_registry(registry.clone());
    loader.open_local(scan_archive()).await.unwrap();

    let thumb = loader.thumbnail().await.unwrap().unwrap();
    let mesh = loader.extract("assets/mesh.glb").await.unwrap();
    assert_eq!(registry.len(), 2);

    let kept = loader.disown("preview.jpg").unwrap();
    assert_eq!(kept.url, thumb.url);
    assert!(loader.disown("preview.jpg").is_none());

    loader.dispose();
    assert!(!loader.is_open());
    assert!(registry.resolve(&mesh.url).is_none());
    assert!(registry.resolve(&thumb.url).is_some());

    assert!(registry.revoke(&thumb.url));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn opening_another_archive_resets_state() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::High);

    loader.open_local(scan_archive()).await.unwrap();
    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    let first_mesh = loader.extract("assets/mesh.glb").await.unwrap();
    assert_eq!(loader.asset_state(AssetType::Mesh), AssetState::Loaded);

    loader.open_local(mesh_only_archive()).await.unwrap();
    assert_eq!(loader.asset_state(AssetType::Mesh), AssetState::Unloaded);
    assert!(loader.registry().resolve(&first_mesh.url).is_none());
    assert!(!loader.content_info().await.unwrap().has_splat);

    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(
        materializer.calls(),
        vec![
            (AssetType::Mesh, "assets/mesh.glb".to_string()),
            (AssetType::Mesh, "bracket.glb".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_open_keeps_previous_archive() {
    let loader = ArchiveLoader::new(LoaderConfig::default());
    loader.open_local(scan_archive()).await.unwrap();
    let thumb = loader.thumbnail().await.unwrap().unwrap();

    let err = loader.open_local(b"garbage".to_vec()).await.unwrap_err();
    assert!(err.is_format());

    assert!(loader.is_open());
    assert!(loader.content_info().await.unwrap().has_mesh);
    assert!(loader.registry().resolve(&thumb.url).is_some());
}

#[tokio::test]
async fn keyed_archive_opens_with_configured_key() {
    let key = [0x13u8, 0x37];
    let obfuscated: Vec<u8> = mesh_only_archive()
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect();

    let plain = ArchiveLoader::new(LoaderConfig::default());
    assert!(plain.open_local(obfuscated.clone()).await.is_err());

    let keyed = ArchiveLoader::new(LoaderConfig {
        archive_key: Some("1337".to_string()),
        ..Default::default()
    });
    keyed.open_local(obfuscated).await.unwrap();
    let manifest = keyed.parse_manifest().await.unwrap();
    assert_eq!(manifest.title.as_deref(), Some("Bracket"));
}

// ── Asset loading ───────────────────────────────────────────────

#[tokio::test]
async fn concurrent_requests_materialize_once() {
    let materializer = Arc::new(RecordingMaterializer::slow(Duration::from_millis(50)));
    let loader = loader_with(&materializer, QualityTier::High);
    loader.open_local(scan_archive()).await.unwrap();

    let (a, b, c) = tokio::join!(
        loader.ensure_asset_loaded(AssetType::Mesh, None),
        loader.ensure_asset_loaded(AssetType::Mesh, None),
        loader.ensure_asset_loaded(AssetType::Mesh, None),
    );

    assert!(a && b && c);
    assert_eq!(materializer.count_for(AssetType::Mesh), 1);
    assert_eq!(loader.asset_state(AssetType::Mesh), AssetState::Loaded);

    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(materializer.count_for(AssetType::Mesh), 1);
}

#[tokio::test]
async fn failures_are_isolated_per_type() {
    let materializer = Arc::new(RecordingMaterializer::failing_for(AssetType::Mesh));
    let loader = loader_with(&materializer, QualityTier::High);
    loader.open_local(scan_archive()).await.unwrap();

    assert!(!loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert!(loader.ensure_asset_loaded(AssetType::Splat, None).await);
    assert_eq!(loader.asset_state(AssetType::Mesh), AssetState::Error);
    assert_eq!(loader.asset_state(AssetType::Splat), AssetState::Loaded);

    // No automatic retry
    assert!(!loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(materializer.count_for(AssetType::Mesh), 1);
}

#[tokio::test]
async fn absent_type_settles_as_error() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::Standard);
    loader.open_local(mesh_only_archive()).await.unwrap();

    assert!(!loader.ensure_asset_loaded(AssetType::Splat, None).await);
    assert_eq!(loader.asset_state(AssetType::Splat), AssetState::Error);

    // Standard falls back to the full mesh when no proxy exists
    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(
        materializer.calls(),
        vec![(AssetType::Mesh, "bracket.glb".to_string())]
    );
}

#[tokio::test]
async fn progress_reports_each_stage() {
    let loader = ArchiveLoader::new(config(QualityTier::Standard));
    loader.open_local(scan_archive()).await.unwrap();

    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = stages.clone();
    let progress: &ProgressFn = &move |p: &LoadProgress| {
        assert_eq!(p.asset_type, AssetType::Mesh);
        sink.lock().unwrap().push(p.stage.clone());
    };

    assert!(loader.ensure_asset_loaded(AssetType::Mesh, Some(progress)).await);
    assert_eq!(
        *stages.lock().unwrap(),
        vec![
            LoadStage::Extracting {
                entry: "assets/mesh_proxy.glb".to_string()
            },
            LoadStage::Materializing,
            LoadStage::Finished { ok: true },
        ]
    );
}

#[tokio::test]
async fn fill_remaining_skips_primary_and_absent_types() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::High);
    loader.open_local(scan_archive()).await.unwrap();
    assert!(loader.ensure_asset_loaded(AssetType::Splat, None).await);

    let results = loader.fill_remaining(Some(AssetType::Splat)).await;
    assert_eq!(
        results,
        vec![(AssetType::Mesh, true), (AssetType::Pointcloud, true)]
    );
    assert_eq!(materializer.count_for(AssetType::Splat), 1);

    let mesh_only = loader_with(&materializer, QualityTier::High);
    mesh_only.open_local(mesh_only_archive()).await.unwrap();
    assert!(mesh_only.fill_remaining(Some(AssetType::Mesh)).await.is_empty());
}

#[tokio::test]
async fn background_fill_runs_on_the_runtime() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = Arc::new(loader_with(&materializer, QualityTier::High));
    loader.open_local(scan_archive()).await.unwrap();

    let handle = loader.spawn_background_fill(None);
    let results = handle.await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, ok)| *ok));
    for asset_type in AssetType::ALL {
        assert_eq!(loader.asset_state(asset_type), AssetState::Loaded);
    }
}

// ── Quality tiers ───────────────────────────────────────────────

#[tokio::test]
async fn auto_tier_follows_device_capabilities() {
    let weak = ArchiveLoader::new(LoaderConfig::default()).with_probe(Arc::new(weak_device()));
    assert_eq!(weak.current_tier(), QualityTier::Standard);
    assert_eq!(weak.budget(), 1_500_000);

    let unknown =
        ArchiveLoader::new(LoaderConfig::default()).with_probe(Arc::new(DeviceCapabilities::default()));
    assert_eq!(unknown.current_tier(), QualityTier::High);
    assert_eq!(unknown.budget(), 5_000_000);
}

#[tokio::test]
async fn switching_tier_swaps_loaded_variants_only() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::Standard);
    loader.open_local(scan_archive()).await.unwrap();

    assert!(loader.ensure_asset_loaded(AssetType::Splat, None).await);
    assert!(loader.ensure_asset_loaded(AssetType::Pointcloud, None).await);

    let switch = loader.switch_quality_tier(QualityTier::High).await.unwrap();
    assert!(switch.changed);
    assert_eq!(switch.tier, QualityTier::High);
    assert_eq!(switch.swapped, vec![AssetType::Splat]);
    assert!(switch.failed.is_empty());
    assert_eq!(loader.current_tier(), QualityTier::High);

    assert_eq!(
        materializer.calls(),
        vec![
            (AssetType::Splat, "assets/scene_proxy.ply".to_string()),
            (AssetType::Pointcloud, "assets/cloud.e57".to_string()),
            (AssetType::Splat, "assets/scene.ply".to_string()),
        ]
    );

    // The mesh was never loaded, so it picks the new tier on first load
    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(
        materializer.calls().last(),
        Some(&(AssetType::Mesh, "assets/mesh.glb".to_string()))
    );
}

#[tokio::test]
async fn switching_to_current_tier_is_a_no_op() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::High);
    loader.open_local(scan_archive()).await.unwrap();
    assert!(loader.ensure_asset_loaded(AssetType::Splat, None).await);

    let switch = loader.switch_quality_tier(QualityTier::High).await.unwrap();
    assert!(!switch.changed);
    assert!(switch.swapped.is_empty());
    assert_eq!(materializer.count_for(AssetType::Splat), 1);
}

#[tokio::test]
async fn swap_failures_are_collected() {
    let materializer = Arc::new(RecordingMaterializer::default());
    let loader = loader_with(&materializer, QualityTier::Standard);

    // The proxy is fine, the full-resolution scene is corrupt
    let manifest = serde_json::json!({
        "data_entries": {
            "scene_0": { "file_name": "scene.ply" },
            "scene_proxy_0": { "file_name": "scene_proxy.ply" }
        }
    });
    let archive = ZipBuilder::new()
        .stored("manifest.json", manifest.to_string())
        .stored("scene_proxy.ply", "small")
        .stored("scene.ply", "large scene payload")
        .build()
        .corrupt("scene.ply");
    loader.open_local(archive).await.unwrap();
    assert!(loader.ensure_asset_loaded(AssetType::Splat, None).await);

    let switch = loader.switch_quality_tier(QualityTier::High).await.unwrap();
    assert!(switch.changed);
    assert!(switch.swapped.is_empty());
    assert_eq!(switch.failed.len(), 1);
    assert_eq!(switch.failed[0].0, AssetType::Splat);
    assert_eq!(loader.asset_state(AssetType::Splat), AssetState::Loaded);
}

#[tokio::test]
async fn tier_switch_during_load_reaches_the_loading_type() {
    let materializer = Arc::new(RecordingMaterializer::slow(Duration::from_millis(200)));
    let loader = loader_with(&materializer, QualityTier::High);
    loader.open_local(scan_archive()).await.unwrap();

    let (loaded, switch) = tokio::join!(loader.ensure_asset_loaded(AssetType::Mesh, None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        loader.switch_quality_tier(QualityTier::Standard).await.unwrap()
    });

    assert!(loaded);
    assert!(switch.changed);
    assert!(switch.swapped.is_empty());
    assert_eq!(loader.current_tier(), QualityTier::Standard);
    assert_eq!(
        materializer.calls(),
        vec![
            (AssetType::Mesh, "assets/mesh.glb".to_string()),
            (AssetType::Mesh, "assets/mesh_proxy.glb".to_string()),
        ]
    );

    // Already in line with the tier, nothing more to do
    assert!(loader.ensure_asset_loaded(AssetType::Mesh, None).await);
    assert_eq!(materializer.count_for(AssetType::Mesh), 2);
}
