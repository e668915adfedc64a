//! The pull pipeline: token, manifest (through an index if needed), config,
//! layers, `manifest.json`, archive. Each stage runs once, in order, and the
//! first failure ends the pull with whatever is on disk left in place.

use std::path::PathBuf;

use pullbox_oci::{repository_path, Platform, RegistryClient};
use tracing::info;

use crate::archive::{output_stem, ArchiveBuilder, DownloadSession};
use crate::error::{Error, Result};

pub const DEFAULT_TAG: &str = "latest";

/// What to pull and where to put it.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// Image name as given by the user, without a tag.
    pub image: String,
    pub tag: String,
    pub platform: Platform,
    /// Directory in which the staging directory and archive are created.
    pub dest: PathBuf,
    pub show_progress: bool,
}

/// Outcome of a successful pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    pub repository: String,
    pub tag: String,
    pub platform: Platform,
    /// Registry digest of the pulled manifest, empty if none was reported.
    pub manifest_digest: String,
    pub output_dir: PathBuf,
    pub archive_path: PathBuf,
    pub config_file: Option<String>,
    pub layers: Vec<String>,
}

/// Split `image[:tag]` into name and tag. An explicit `tag` wins over one
/// embedded in the name.
pub fn split_image_tag(image: &str, tag: Option<&str>) -> Result<(String, String)> {
    let image = image.trim();
    if image.is_empty() || image.contains('@') {
        return Err(Error::InvalidImage(image.to_string()));
    }

    let after_last_slash = image.rfind('/').map(|p| p + 1).unwrap_or(0);
    let (name, embedded) = match image.rfind(':') {
        Some(pos) if pos >= after_last_slash => (&image[..pos], Some(&image[pos + 1..])),
        _ => (image, None),
    };
    if name.is_empty() || embedded.is_some_and(str::is_empty) {
        return Err(Error::InvalidImage(image.to_string()));
    }

    let tag = tag.or(embedded).unwrap_or(DEFAULT_TAG);
    Ok((name.to_string(), tag.to_string()))
}

/// Run the whole pipeline for `request`.
pub async fn pull_image(client: &RegistryClient, request: &PullRequest) -> Result<PullReport> {
    let repository = repository_path(&request.image);
    let platform = &request.platform;
    info!(
        repository = %repository,
        tag = %request.tag,
        "downloading {}:{} for {}",
        repository,
        request.tag,
        platform,
    );

    let token = client.fetch_token(&repository).await?;
    info!("token acquired");

    let resolved = client
        .resolve_manifest(&repository, &request.tag, &token, platform)
        .await?;
    info!(
        schema_version = resolved.manifest.schema_version,
        digest = %resolved.digest,
        layers = resolved.manifest.layers.len(),
        "manifest resolved",
    );

    let stem = output_stem(&repository, &request.tag, &platform.architecture);
    let output_dir = request.dest.join(&stem);
    let archive_path = request.dest.join(format!("{}.tar", stem));

    let session = DownloadSession::new(&repository, &request.tag, token, output_dir.clone());
    let mut builder = ArchiveBuilder::new(client, session, request.show_progress);
    builder.prepare().await?;

    if let Some(config) = &resolved.manifest.config {
        builder.download_config(config).await?;
    }
    builder.download_layers(&resolved.manifest.layers).await?;
    builder.write_descriptor().await?;
    builder.write_archive(&archive_path).await?;

    let session = builder.into_session();
    info!(path = %archive_path.display(), "download complete");

    Ok(PullReport {
        repository,
        tag: request.tag.clone(),
        platform: platform.clone(),
        manifest_digest: resolved.digest,
        output_dir,
        archive_path,
        config_file: session.config_file,
        layers: session.layer_filenames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_name_defaults_to_latest() {
        assert_eq!(
            split_image_tag("postgres", None).unwrap(),
            ("postgres".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn split_uses_explicit_tag() {
        assert_eq!(
            split_image_tag("postgres", Some("16-alpine")).unwrap(),
            ("postgres".to_string(), "16-alpine".to_string())
        );
    }

    #[test]
    fn split_embedded_tag() {
        assert_eq!(
            split_image_tag("bitnami/redis:7.2", None).unwrap(),
            ("bitnami/redis".to_string(), "7.2".to_string())
        );
    }

    #[test]
    fn explicit_tag_overrides_embedded() {
        assert_eq!(
            split_image_tag("redis:7.2", Some("7.4")).unwrap(),
            ("redis".to_string(), "7.4".to_string())
        );
    }

    #[test]
    fn split_rejects_bad_names() {
        for raw in ["", "  ", "redis:", ":7.2", "redis@sha256:abc"] {
            assert!(
                matches!(split_image_tag(raw, None), Err(Error::InvalidImage(_))),
                "{raw:?}"
            );
        }
    }
}
