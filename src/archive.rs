//! Archive builder: writes an image's blobs into a staging directory, adds a
//! `manifest.json` in the shape `docker load` / `podman load` expect, and tars
//! the directory.
//!
//! Layout of a finished pull, for `library/alpine:3.20` on `linux/amd64`:
//!
//! ```text
//! library_alpine_3.20_amd64/
//!     config.json
//!     layer-1.tar.gz
//!     manifest.json
//! library_alpine_3.20_amd64.tar
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use pullbox_oci::{Descriptor, RegistryClient, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const DESCRIPTOR_FILE: &str = "manifest.json";

/// `{image}_{tag}_{arch}` with every `/` in the image name replaced by `_`.
/// Used for both the staging directory and the archive.
pub fn output_stem(repository: &str, tag: &str, arch: &str) -> String {
    format!("{}_{}_{}", repository.replace('/', "_"), tag, arch)
}

/// File name of the layer at 1-based position `index`.
pub fn layer_filename(index: usize) -> String {
    format!("layer-{}.tar.gz", index)
}

// ---------------------------------------------------------------------------
// manifest.json
// ---------------------------------------------------------------------------

/// One entry of the `manifest.json` array read by container runtimes when
/// loading an image from a tar archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadManifestEntry {
    #[serde(rename = "Config", default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    #[serde(rename = "RepoTags")]
    pub repo_tags: Vec<String>,

    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

// ---------------------------------------------------------------------------
// DownloadSession
// ---------------------------------------------------------------------------

/// State of one pull. Lives only as long as the invocation.
#[derive(Debug)]
pub struct DownloadSession {
    pub repository: String,
    pub tag: String,
    token: SecretString,
    pub output_dir: PathBuf,
    pub config_file: Option<String>,
    pub layer_filenames: Vec<String>,
}

impl DownloadSession {
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
        token: SecretString,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            token,
            output_dir,
            config_file: None,
            layer_filenames: Vec::new(),
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// The `manifest.json` entry describing what has been downloaded so far.
    pub fn load_manifest(&self) -> LoadManifestEntry {
        LoadManifestEntry {
            config: self.config_file.clone(),
            repo_tags: vec![format!("{}:{}", self.repository, self.tag)],
            layers: self.layer_filenames.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ArchiveBuilder
// ---------------------------------------------------------------------------

pub struct ArchiveBuilder<'a> {
    client: &'a RegistryClient,
    session: DownloadSession,
    show_progress: bool,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(client: &'a RegistryClient, session: DownloadSession, show_progress: bool) -> Self {
        Self {
            client,
            session,
            show_progress,
        }
    }

    pub fn into_session(self) -> DownloadSession {
        self.session
    }

    /// Create the staging directory. An existing directory is reused.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.session.output_dir).await?;
        Ok(())
    }

    /// Download the image config blob to `config.json`.
    pub async fn download_config(&mut self, config: &Descriptor) -> Result<PathBuf> {
        info!(digest = %config.digest, "downloading config");
        let path = self.session.output_dir.join(CONFIG_FILE);
        self.client
            .fetch_blob_to_file(
                &self.session.repository,
                &config.digest,
                self.session.token(),
                &path,
                None,
                |_| {},
            )
            .await?;
        self.session.config_file = Some(CONFIG_FILE.to_string());
        info!(path = %path.display(), "saved config");
        Ok(path)
    }

    /// Download every layer in manifest order to `layer-<n>.tar.gz`. The
    /// first failure aborts the remaining layers.
    pub async fn download_layers(&mut self, layers: &[Descriptor]) -> Result<()> {
        let total = layers.len();
        info!("downloading {} layers", total);

        let timeout = self.client.config().layer_timeout;
        for (i, layer) in layers.iter().enumerate() {
            let index = i + 1;
            let filename = layer_filename(index);
            let path = self.session.output_dir.join(&filename);
            info!(
                digest = %layer.digest,
                "[{}/{}] layer {:.2} MB",
                index,
                total,
                layer.size as f64 / (1024.0 * 1024.0),
            );

            let pb = layer_progress(
                format!("[{}/{}]", index, total),
                layer.size,
                self.show_progress,
            );
            let result = self
                .client
                .fetch_blob_to_file(
                    &self.session.repository,
                    &layer.digest,
                    self.session.token(),
                    &path,
                    Some(timeout),
                    |n| pb.inc(n),
                )
                .await;

            match result {
                Ok(bytes) => {
                    pb.finish_and_clear();
                    info!(path = %path.display(), bytes, "saved layer");
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e.into());
                }
            }
            self.session.layer_filenames.push(filename);
        }
        Ok(())
    }

    /// Write `manifest.json` into the staging directory.
    pub async fn write_descriptor(&self) -> Result<PathBuf> {
        let path = self.session.output_dir.join(DESCRIPTOR_FILE);
        let body = serde_json::to_string_pretty(&[self.session.load_manifest()])?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), "wrote load manifest");
        Ok(path)
    }

    /// Tar the staging directory into `archive_path`, contents at the
    /// archive root.
    pub async fn write_archive(&self, archive_path: &Path) -> Result<PathBuf> {
        let src = self.session.output_dir.clone();
        let dst = archive_path.to_path_buf();

        // Tarring is blocking I/O; run on the blocking pool.
        let entries = tokio::task::spawn_blocking(move || tar_directory(&src, &dst))
            .await
            .map_err(|e| Error::Archive(format!("archive task panicked: {}", e)))??;

        info!(path = %archive_path.display(), entries, "wrote archive");
        Ok(archive_path.to_path_buf())
    }
}

/// Write every regular file directly inside `src` into an uncompressed tar at
/// `dest`, in file name order, without a leading directory. Returns the
/// number of entries written.
pub fn tar_directory(src: &Path, dest: &Path) -> Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let out = fs::File::create(dest)?;
    let mut builder = tar::Builder::new(out);
    for path in &files {
        let name = path
            .file_name()
            .ok_or_else(|| Error::Archive(format!("no file name in {}", path.display())))?;
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()?.sync_all()?;
    Ok(files.len())
}

/// Progress bar for one layer. Hidden when progress is off or the declared
/// size is zero, since no percentage can be computed.
fn layer_progress(label: String, size: u64, visible: bool) -> ProgressBar {
    if !visible || size == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(size);
    if let Ok(style) = ProgressStyle::with_template(
        "  {msg} [{bar:40.cyan/blue}] {percent:>3}% {bytes}/{total_bytes}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(label);
    pb
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
