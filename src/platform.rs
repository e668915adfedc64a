//! Target platform selection.
//!
//! The host machine identifier is passed in rather than read here, so the
//! mapping can be exercised for any machine.

use pullbox_oci::Platform;

use crate::error::{Error, Result};

/// OS reported for every platform this tool pulls.
pub const DEFAULT_OS: &str = "linux";

/// Architecture used when the host machine is not recognised.
pub const DEFAULT_ARCH: &str = "amd64";

/// Machine identifier of the running host (e.g. `x86_64`, `aarch64`).
pub fn host_machine() -> &'static str {
    std::env::consts::ARCH
}

/// Map a machine identifier to the platform pulled for it.
pub fn platform_for_machine(machine: &str) -> Platform {
    let arch = match machine.to_ascii_lowercase().as_str() {
        "amd64" | "x86_64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        _ => DEFAULT_ARCH,
    };
    Platform::new(DEFAULT_OS, arch)
}

/// Parse an `os/arch` string.
pub fn parse_platform(raw: &str) -> Result<Platform> {
    match raw.split_once('/') {
        Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
            Ok(Platform::new(os, arch))
        }
        _ => Err(Error::InvalidPlatform(raw.to_string())),
    }
}

/// Use `requested` when given, otherwise derive the platform from
/// `host_machine`.
pub fn resolve_platform(requested: Option<&str>, host_machine: &str) -> Result<Platform> {
    match requested {
        Some(raw) => parse_platform(raw),
        None => Ok(platform_for_machine(host_machine)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_platform_is_split_literally() {
        for (raw, os, arch) in [
            ("linux/amd64", "linux", "amd64"),
            ("linux/arm64", "linux", "arm64"),
            ("windows/amd64", "windows", "amd64"),
            ("linux/riscv64", "linux", "riscv64"),
        ] {
            let p = resolve_platform(Some(raw), "aarch64").unwrap();
            assert_eq!(p, Platform::new(os, arch), "{raw}");
        }
    }

    #[test]
    fn amd64_machines() {
        for machine in ["amd64", "x86_64", "X86_64"] {
            assert_eq!(
                resolve_platform(None, machine).unwrap(),
                Platform::new("linux", "amd64")
            );
        }
    }

    #[test]
    fn arm64_machines() {
        for machine in ["aarch64", "arm64"] {
            assert_eq!(
                resolve_platform(None, machine).unwrap(),
                Platform::new("linux", "arm64")
            );
        }
    }

    #[test]
    fn unknown_machine_falls_back_to_amd64() {
        for machine in ["s390x", "riscv64", "", "armv7l"] {
            assert_eq!(platform_for_machine(machine), Platform::new("linux", "amd64"));
        }
    }

    #[test]
    fn malformed_platform_rejected() {
        for raw in ["linux", "/amd64", "linux/", "linux/arm/v7", ""] {
            assert!(
                matches!(parse_platform(raw), Err(Error::InvalidPlatform(_))),
                "{raw}"
            );
        }
    }
}
