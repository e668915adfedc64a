//! Docker registry v2 client: anonymous token auth, manifest and index
//! fetching, platform selection and streaming blob downloads.

pub mod error;
pub mod manifest;
pub mod registry;

pub use error::{RegistryError, Result};
pub use manifest::{Descriptor, ImageIndex, ImageManifest, ManifestDocument, Platform};
pub use registry::{
    repository_path, BlobStream, FetchedManifest, RegistryClient, RegistryConfig,
    ResolvedManifest,
};
pub use secrecy::SecretString;
