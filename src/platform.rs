use std::env::consts;

use serde::{Deserialize, Serialize};

/// The architecture and operating system a package is built for.
///
/// Names follow the conventional short forms (`386`, `amd64`, `arm`,
/// `arm64`; `linux`, `freebsd`, `darwin`); each format maps them onto its own
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Architecture name
    pub arch: String,
    /// Operating system name
    pub os:   String,
}

impl Platform {
    /// Create a platform from explicit names
    pub fn new<A: Into<String>, O: Into<String>>(arch: A, os: O) -> Self {
        Self {
            arch: arch.into(),
            os:   os.into(),
        }
    }

    /// The platform this binary was compiled for
    pub fn host() -> Self {
        let arch = match consts::ARCH {
            "x86" => "386",
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        let os = match consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Self::new(arch, os)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}
