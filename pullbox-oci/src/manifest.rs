use std::fmt;

use serde::Deserialize;

use crate::{RegistryError, Result};

// ---------------------------------------------------------------------------
// Image Manifest
// ---------------------------------------------------------------------------

/// A single-platform image manifest (Docker v2 schema 2 or OCI).
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    #[serde(default)]
    pub config: Option<Descriptor>,

    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A content-addressable descriptor used in both manifests and image indexes.
///
/// Inside a manifest it references a blob at `/v2/<repo>/blobs/<digest>`;
/// inside an index it references a per-platform manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    pub digest: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub platform: Option<Platform>,
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// An `os/architecture` pair, either requested by the user or attached to an
/// index entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }

    /// `os` and `architecture` are compared; `variant` is not.
    pub fn matches(&self, other: &Platform) -> bool {
        self.os == other.os && self.architecture == other.architecture
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Placeholder os/architecture for index entries without a platform.
pub const UNKNOWN_PLATFORM: &str = "unknown";

// ---------------------------------------------------------------------------
// Image Index (fat manifest)
// ---------------------------------------------------------------------------

/// An OCI image index or Docker manifest list.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Return the first entry, in index order, whose platform matches
    /// `target`. Later entries are never consulted once one matches.
    pub fn select_platform(&self, target: &Platform) -> Result<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| d.platform.as_ref().is_some_and(|p| p.matches(target)))
            .ok_or_else(|| RegistryError::PlatformNotFound {
                platform: target.clone(),
                available: self.platforms(),
            })
    }

    /// Every platform listed in the index, in order. Entries without a
    /// platform are reported as `unknown/unknown`.
    pub fn platforms(&self) -> Vec<Platform> {
        self.manifests
            .iter()
            .map(|d| {
                d.platform
                    .clone()
                    .unwrap_or_else(|| Platform::new(UNKNOWN_PLATFORM, UNKNOWN_PLATFORM))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ManifestDocument
// ---------------------------------------------------------------------------

/// A decoded manifest endpoint response.
#[derive(Debug, Clone)]
pub enum ManifestDocument {
    Image(ImageManifest),
    Index(ImageIndex),
}

impl ManifestDocument {
    /// Decode a manifest response body, choosing the variant from its
    /// `mediaType`. Documents without a `mediaType` are treated as an index
    /// when they carry a `manifests` array.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RegistryError::Manifest(format!("malformed JSON: {}", e)))?;

        let media_type = raw.get("mediaType").and_then(|v| v.as_str()).unwrap_or("");
        let is_index = if media_type.is_empty() {
            raw.get("manifests").is_some()
        } else {
            is_index_media_type(media_type)
        };

        if is_index {
            let idx: ImageIndex = serde_json::from_value(raw)
                .map_err(|e| RegistryError::Manifest(format!("malformed index: {}", e)))?;
            Ok(ManifestDocument::Index(idx))
        } else {
            let m: ImageManifest = serde_json::from_value(raw)
                .map_err(|e| RegistryError::Manifest(format!("malformed manifest: {}", e)))?;
            Ok(ManifestDocument::Image(m))
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            ManifestDocument::Image(m) => &m.media_type,
            ManifestDocument::Index(idx) => &idx.media_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Media type constants
// ---------------------------------------------------------------------------

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media types sent in the `Accept` header of every manifest request.
pub const MANIFEST_ACCEPT: [&str; 4] = [
    MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
];

/// Returns `true` when `media_type` names an image index / manifest list.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type.contains("index") || media_type.contains("manifest.list")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
