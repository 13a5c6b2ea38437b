#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

//! Builds Debian and RPM packages from a declarative file manifest.
//!
//! Files are collected into a [`Tree`] owned by a format writer (an
//! [`Archive`]), package metadata is absorbed into format-specific fields, and
//! the writer serializes everything to a byte sink in one pass.

pub use archive::{Archive, Defaults, Format};
pub use deb::{Deb, DebDefaults, DEBIAN_BINARY};
pub use error::ShipError;
pub use meta::{Meta, PackageMeta};
pub use package::{Config, ManifestFile, Package, Target};
pub use platform::Platform;
pub use rpm::{Lead, Rpm, RpmArch, RpmDefaults, BINARY_RPM, LEAD_SIZE, RPM_MAGIC, SOURCE_RPM};
pub use tree::{FileInfo, Leaf, Tree};

/// The writer interface shared by all package formats
mod archive;
/// Debian packages: ar wrapping gzip-compressed tarballs
mod deb;
/// Error codes
mod error;
/// Package metadata
mod meta;
/// Config file loading and the build driver
mod package;
/// Target architecture and operating system
mod platform;
/// RPM lead record
mod rpm;
/// The in-memory file tree writers collect files into
mod tree;

/// Mode of every directory entry synthesized from file paths
const DIR_MODE: u32 = 0o755;

/// Mode of generated metadata files and outer archive members
const META_MODE: u32 = 0o644;
