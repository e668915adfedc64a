//! pullbox: fetch a container image from Docker Hub into a loadable tar
//!
//! Resolves a tag (through a multi-architecture index when the registry
//! returns one) to a single-platform manifest, downloads its config and
//! layer blobs, and packs them with a `manifest.json` into an archive that
//! `docker load` / `podman load` accept.
//!
//! # Example
//!
//! ```no_run
//! use pullbox::{pull::{pull_image, PullRequest}, platform};
//! use pullbox_oci::{RegistryClient, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new(RegistryConfig::default())?;
//!     let request = PullRequest {
//!         image: "alpine".into(),
//!         tag: "3.20".into(),
//!         platform: platform::resolve_platform(None, platform::host_machine())?,
//!         dest: ".".into(),
//!         show_progress: true,
//!     };
//!
//!     let report = pull_image(&client, &request).await?;
//!     println!("archive: {}", report.archive_path.display());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod platform;
pub mod pull;

// Re-exports for convenience
pub use error::{Error, Result};
pub use pull::{pull_image, PullReport, PullRequest};
