#![allow(dead_code)]

use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use scanzip::{AssetType, ExtractedAsset, Materializer};

// ── Archive builder ─────────────────────────────────────────────

/// 12:00:00
pub const DOS_TIME: u16 = 12 << 11;
/// 2024-05-17
pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (5 << 5) | 17;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
}

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    method: Method,
}

/// Writes small ZIP archives the way common tools lay them out.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<PendingEntry>,
    comment: Vec<u8>,
    zip64: bool,
}

/// A built archive plus where each entry's payload landed.
pub struct BuiltArchive {
    pub bytes: Vec<u8>,
    pub payloads: HashMap<String, Range<usize>>,
}

impl BuiltArchive {
    /// Flip one payload byte without touching any header.
    pub fn corrupt(mut self, name: &str) -> Vec<u8> {
        let range = self.payloads[name].clone();
        let mid = range.start + range.len() / 2;
        self.bytes[mid] ^= 0xFF;
        self.bytes
    }
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            data: data.into(),
            method: Method::Stored,
        });
        self
    }

    pub fn deflated(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            data: data.into(),
            method: Method::Deflate,
        });
        self
    }

    pub fn directory(self, name: &str) -> Self {
        self.stored(name, Vec::<u8>::new())
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Emit ZIP64 end records with the classic fields saturated.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(self) -> BuiltArchive {
        let mut out = Vec::new();
        let mut directory = Vec::new();
        let mut payloads = HashMap::new();

        for entry in &self.entries {
            let crc = crc32fast::hash(&entry.data);
            let (method, payload) = match entry.method {
                Method::Stored => (0u16, entry.data.clone()),
                Method::Deflate => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(&entry.data).unwrap();
                    (8u16, encoder.finish().unwrap())
                }
            };
            let lfh_offset = out.len() as u32;

            out.extend_from_slice(b"PK\x03\x04");
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(method).unwrap();
            out.write_u16::<LittleEndian>(DOS_TIME).unwrap();
            out.write_u16::<LittleEndian>(DOS_DATE).unwrap();
            out.write_u32::<LittleEndian>(crc).unwrap();
            out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
            out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.extend_from_slice(entry.name.as_bytes());
            let start = out.len();
            out.extend_from_slice(&payload);
            payloads.insert(entry.name.clone(), start..out.len());

            let external_attrs: u32 = if entry.name.ends_with('/') { 0x10 } else { 0 };
            directory.extend_from_slice(b"PK\x01\x02");
            directory.write_u16::<LittleEndian>(20).unwrap();
            directory.write_u16::<LittleEndian>(20).unwrap();
            directory.write_u16::<LittleEndian>(0).unwrap();
            directory.write_u16::<LittleEndian>(method).unwrap();
            directory.write_u16::<LittleEndian>(DOS_TIME).unwrap();
            directory.write_u16::<LittleEndian>(DOS_DATE).unwrap();
            directory.write_u32::<LittleEndian>(crc).unwrap();
            directory.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            directory.write_u32::<LittleEndian>(entry.data.len() as u32).unwrap();
            directory.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            directory.write_u16::<LittleEndian>(0).unwrap();
            directory.write_u16::<LittleEndian>(0).unwrap();
            directory.write_u16::<LittleEndian>(0).unwrap();
            directory.write_u16::<LittleEndian>(0).unwrap();
            directory.write_u32::<LittleEndian>(external_attrs).unwrap();
            directory.write_u32::<LittleEndian>(lfh_offset).unwrap();
            directory.extend_from_slice(entry.name.as_bytes());
        }

        let cd_offset = out.len() as u64;
        let cd_size = directory.len() as u64;
        let count = self.entries.len() as u64;
        out.extend_from_slice(&directory);

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            out.write_u64::<LittleEndian>(44).unwrap();
            out.write_u16::<LittleEndian>(45).unwrap();
            out.write_u16::<LittleEndian>(45).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap();
            out.write_u64::<LittleEndian>(count).unwrap();
            out.write_u64::<LittleEndian>(count).unwrap();
            out.write_u64::<LittleEndian>(cd_size).unwrap();
            out.write_u64::<LittleEndian>(cd_offset).unwrap();

            out.extend_from_slice(b"PK\x06\x07");
            out.write_u32::<LittleEndian>(0).unwrap();
            out.write_u64::<LittleEndian>(eocd64_offset).unwrap();
            out.write_u32::<LittleEndian>(1).unwrap();
        }

        let (classic_count, classic_size, classic_offset) = if self.zip64 {
            (0xFFFF, 0xFFFF_FFFF, 0xFFFF_FFFF)
        } else {
            (count as u16, cd_size as u32, cd_offset as u32)
        };
        out.extend_from_slice(b"PK\x05\x06");
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(classic_count).unwrap();
        out.write_u16::<LittleEndian>(classic_count).unwrap();
        out.write_u32::<LittleEndian>(classic_size).unwrap();
        out.write_u32::<LittleEndian>(classic_offset).unwrap();
        out.write_u16::<LittleEndian>(self.comment.len() as u16).unwrap();
        out.extend_from_slice(&self.comment);

        BuiltArchive {
            bytes: out,
            payloads,
        }
    }
}

// ── Scan archives ───────────────────────────────────────────────

pub const SCENE: &[u8] = b"ply\nformat binary_little_endian 1.0\nelement vertex 4096\n";
pub const SCENE_PROXY: &[u8] = b"ply\nformat binary_little_endian 1.0\nelement vertex 64\n";
pub const MESH: &[u8] = b"glTF\x02\x00\x00\x00full resolution mesh";
pub const MESH_PROXY: &[u8] = b"glTF\x02\x00\x00\x00decimated mesh";
pub const POINTCLOUD: &[u8] = b"E57 point cloud payload";
pub const THUMBNAIL: &[u8] = b"\xFF\xD8\xFF\xE0 tiny jpeg";

pub fn scan_manifest() -> String {
    serde_json::json!({
        "containerVersion": "1.0",
        "project": {
            "title": "Chapel Survey",
            "description": "Interior capture",
            "license": "CC-BY-4.0",
            "tags": ["heritage", "interior"]
        },
        "provenance": { "operator": "Field team", "captureDate": "2024-05-17" },
        "data_entries": {
            "scene_0": { "file_name": "assets/scene.ply", "position": [1.0, 2.0, 3.0], "scale": 2.0 },
            "scene_proxy_0": { "file_name": "assets/scene_proxy.ply" },
            "mesh_0": { "fileName": "assets/mesh.glb", "rotation": { "x": 0.0, "y": 90.0, "z": 0.0 } },
            "mesh_proxy_0": { "file_name": "assets/mesh_proxy.glb" },
            "pointcloud_0": { "file_name": "assets/cloud.e57" },
            "thumbnail_0": { "file_name": "preview.jpg" },
            "source_0": { "file_name": "sources/notes.txt", "createdBy": "surveyor" }
        },
        "viewerSettings": { "displayMode": "splat", "autoRotate": true },
        "annotations": [
            { "id": 1, "title": "Altar", "position": { "x": 0.5, "y": 1.0, "z": -2.0 } },
            { "id": "door", "title": "West door" }
        ],
        "globalAlignment": { "position": [0.0, 0.0, 0.0], "scale": 1.0 }
    })
    .to_string()
}

/// Manifest first, thumbnail right after it, then the heavy assets.
pub fn scan_archive() -> Vec<u8> {
    ZipBuilder::new()
        .deflated("manifest.json", scan_manifest())
        .stored("preview.jpg", THUMBNAIL)
        .deflated("assets/scene.ply", SCENE)
        .deflated("assets/scene_proxy.ply", SCENE_PROXY)
        .stored("assets/mesh.glb", MESH)
        .stored("assets/mesh_proxy.glb", MESH_PROXY)
        .deflated("assets/cloud.e57", POINTCLOUD)
        .directory("sources/")
        .stored("sources/notes.txt", "measured 2024-05-17")
        .stored("sources/raw/img_0001.jpg", THUMBNAIL)
        .build()
        .bytes
}

/// Archive with only a mesh and no proxies.
pub fn mesh_only_archive() -> Vec<u8> {
    let manifest = serde_json::json!({
        "title": "Bracket",
        "data_entries": { "mesh_0": { "file_name": "bracket.glb" } }
    });
    ZipBuilder::new()
        .stored("manifest.json", manifest.to_string())
        .stored("bracket.glb", MESH)
        .build()
        .bytes
}

// ── Range server ────────────────────────────────────────────────

/// Serves one resource honouring `bytes=a-b` and `bytes=-n`.
pub struct RangeServer {
    body: Vec<u8>,
    ignore_range: bool,
    delay: Option<Duration>,
    served: AtomicU64,
}

impl RangeServer {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ignore_range: false,
            delay: None,
            served: AtomicU64::new(0),
        }
    }

    /// Answer every request with 200 and the whole body.
    pub fn ignoring_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn range_of(&self, header: &str) -> Option<Range<usize>> {
        let spec = header.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let size = self.body.len();
        if start.is_empty() {
            let suffix: usize = end.parse().ok()?;
            return Some(size.saturating_sub(suffix)..size);
        }
        let start: usize = start.parse().ok()?;
        let end = match end {
            "" => size,
            end => (end.parse::<usize>().ok()? + 1).min(size),
        };
        (start < end).then_some(start..end)
    }
}

impl Respond for RangeServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let header = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let template = match header.filter(|_| !self.ignore_range) {
            None => {
                self.served.fetch_add(self.body.len() as u64, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_bytes(self.body.clone())
            }
            Some(header) => match self.range_of(&header) {
                Some(range) => {
                    self.served.fetch_add(range.len() as u64, Ordering::SeqCst);
                    let content_range =
                        format!("bytes {}-{}/{}", range.start, range.end - 1, self.body.len());
                    ResponseTemplate::new(206)
                        .insert_header("Content-Range", content_range.as_str())
                        .set_body_bytes(self.body[range].to_vec())
                }
                None => ResponseTemplate::new(416)
                    .insert_header("Content-Range", format!("bytes */{}", self.body.len()).as_str()),
            },
        };
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Mount `server` at `/scan.zip` and return the archive URL.
pub async fn serve(mock: &MockServer, server: RangeServer) -> String {
    Mock::given(method("GET"))
        .and(path("/scan.zip"))
        .respond_with(server)
        .mount(mock)
        .await;
    format!("{}/scan.zip", mock.uri())
}

/// Range headers of every request the mock server has seen.
pub async fn ranges_requested(mock: &MockServer) -> Vec<String> {
    mock.received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        })
        .collect()
}

// ── Materializers ───────────────────────────────────────────────

/// Records every materialization, optionally failing for one type.
#[derive(Default)]
pub struct RecordingMaterializer {
    pub calls: Mutex<Vec<(AssetType, String)>>,
    pub fail_for: Option<AssetType>,
    pub delay: Option<Duration>,
}

impl RecordingMaterializer {
    pub fn failing_for(asset_type: AssetType) -> Self {
        Self {
            fail_for: Some(asset_type),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(AssetType, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_for(&self, asset_type: AssetType) -> usize {
        self.calls().iter().filter(|(t, _)| *t == asset_type).count()
    }
}

#[async_trait]
impl Materializer for RecordingMaterializer {
    async fn materialize(&self, asset_type: AssetType, asset: &ExtractedAsset) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((asset_type, asset.entry_name.clone()));
        if self.fail_for == Some(asset_type) {
            anyhow::bail!("renderer rejected {}", asset.entry_name);
        }
        Ok(())
    }
}
