use crate::manifest::Platform;

/// Errors produced while talking to a registry.
///
/// Each variant names the stage that failed; transport errors are folded into
/// the variant of the request that raised them.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("manifest fetch failed: {0}")]
    Manifest(String),

    #[error(
        "platform {platform} not found in index (available: {})",
        format_platforms(available)
    )]
    PlatformNotFound {
        platform: Platform,
        available: Vec<Platform>,
    },

    #[error("blob download failed for {digest}: {reason}")]
    BlobDownload { digest: String, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RegistryError>;

fn format_platforms(platforms: &[Platform]) -> String {
    if platforms.is_empty() {
        return "none".to_string();
    }
    platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_not_found_lists_available() {
        let err = RegistryError::PlatformNotFound {
            platform: Platform::new("linux", "s390x"),
            available: vec![Platform::new("linux", "arm64"), Platform::new("linux", "amd64")],
        };
        assert_eq!(
            err.to_string(),
            "platform linux/s390x not found in index (available: linux/arm64, linux/amd64)"
        );
    }

    #[test]
    fn platform_not_found_with_empty_index() {
        let err = RegistryError::PlatformNotFound {
            platform: Platform::new("linux", "amd64"),
            available: Vec::new(),
        };
        assert!(err.to_string().ends_with("(available: none)"));
    }
}
