use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use pullbox::platform::{host_machine, resolve_platform};
use pullbox::pull::{pull_image, split_image_tag, PullReport, PullRequest};
use pullbox_oci::{RegistryClient, RegistryConfig};

/// Download a container image from Docker Hub into a tar archive that
/// `podman load` / `docker load` accept.
#[derive(Debug, Parser)]
#[command(name = "pullbox", version)]
struct Cli {
    /// Image name, e.g. `postgres` or `bitnami/redis` (`name:tag` also accepted)
    image: String,

    /// Tag to pull [default: latest]
    tag: Option<String>,

    /// Target platform as `os/arch` [default: detected from the host]
    platform: Option<String>,

    /// Directory in which the output directory and archive are created
    #[arg(long, env = "PULLBOX_DEST", default_value = ".")]
    dest: PathBuf,

    /// Do not draw per-layer progress bars
    #[arg(long, env = "PULLBOX_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(cli).await {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> pullbox::Result<PullReport> {
    let (image, tag) = split_image_tag(&cli.image, cli.tag.as_deref())?;
    let platform = resolve_platform(cli.platform.as_deref(), host_machine())?;
    let client = RegistryClient::new(RegistryConfig::default())?;

    let request = PullRequest {
        image,
        tag,
        platform,
        dest: cli.dest,
        show_progress: !cli.no_progress,
    };
    pull_image(&client, &request).await
}

fn print_summary(report: &PullReport) {
    println!("image: {}:{}", report.repository, report.tag);
    println!("platform: {}", report.platform);
    if !report.manifest_digest.is_empty() {
        println!("manifest: {}", report.manifest_digest);
    }
    println!("layers: {}", report.layers.len());
    println!("output directory: {}", report.output_dir.display());
    println!("archive: {}", report.archive_path.display());
    println!();
    println!("To load into Podman:");
    println!("  podman load -i {}", report.archive_path.display());
}

fn print_usage() {
    println!("Usage: pullbox <image_name> [tag] [platform]");
    println!("Example: pullbox postgres 16-alpine");
    println!("Example: pullbox postgres 16-alpine linux/amd64");
}
