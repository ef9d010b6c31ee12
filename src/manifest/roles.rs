use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic role of a manifest data entry, taken from its key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Scene,
    SceneProxy,
    Mesh,
    MeshProxy,
    Pointcloud,
    Thumbnail,
    Source,
    Image,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Scene,
        Role::SceneProxy,
        Role::Mesh,
        Role::MeshProxy,
        Role::Pointcloud,
        Role::Thumbnail,
        Role::Source,
        Role::Image,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Role::Scene => "scene",
            Role::SceneProxy => "scene_proxy",
            Role::Mesh => "mesh",
            Role::MeshProxy => "mesh_proxy",
            Role::Pointcloud => "pointcloud",
            Role::Thumbnail => "thumbnail",
            Role::Source => "source",
            Role::Image => "image",
        }
    }

    /// Split a data-entry key such as `mesh_proxy_0` into its role and index.
    ///
    /// A key without a numeric suffix is index 0.
    pub fn parse_key(key: &str) -> Option<(Role, u32)> {
        let (token, index) = match key.rsplit_once('_') {
            Some((token, digits))
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) =>
            {
                (token, digits.parse().ok()?)
            }
            _ => (key, 0),
        };
        Role::ALL
            .into_iter()
            .find(|role| role.token() == token)
            .map(|role| (role, index))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = match s {
            "splat" => "scene",
            "point_cloud" | "point-cloud" => "pointcloud",
            "source_files" | "source-files" | "sources" => "source",
            "images" => "image",
            other => other,
        };
        Role::ALL
            .into_iter()
            .find(|role| role.token() == token)
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Logical asset type tracked by the load coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Splat,
    Mesh,
    Pointcloud,
}

impl AssetType {
    pub const ALL: [AssetType; 3] = [AssetType::Splat, AssetType::Mesh, AssetType::Pointcloud];

    /// Role of the full-resolution entry
    pub fn role(&self) -> Role {
        match self {
            AssetType::Splat => Role::Scene,
            AssetType::Mesh => Role::Mesh,
            AssetType::Pointcloud => Role::Pointcloud,
        }
    }

    /// Role of the lower-detail counterpart, if this type has one
    pub fn proxy_role(&self) -> Option<Role> {
        match self {
            AssetType::Splat => Some(Role::SceneProxy),
            AssetType::Mesh => Some(Role::MeshProxy),
            AssetType::Pointcloud => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetType::Splat => "splat",
            AssetType::Mesh => "mesh",
            AssetType::Pointcloud => "pointcloud",
        })
    }
}

/// Which kinds of content an archive can actually deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub has_splat: bool,
    pub has_mesh: bool,
    pub has_pointcloud: bool,
    pub has_thumbnail: bool,
    pub has_scene_proxy: bool,
    pub has_mesh_proxy: bool,
    pub has_source_files: bool,
    pub has_images: bool,
}

impl ContentInfo {
    pub fn has(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::Splat => self.has_splat,
            AssetType::Mesh => self.has_mesh,
            AssetType::Pointcloud => self.has_pointcloud,
        }
    }

    /// True when both a full-resolution and a proxy entry exist for the type
    pub fn has_proxy_pair(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::Splat => self.has_splat && self.has_scene_proxy,
            AssetType::Mesh => self.has_mesh && self.has_mesh_proxy,
            AssetType::Pointcloud => false,
        }
    }
}
