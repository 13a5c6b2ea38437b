use std::{fmt, io::Write, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    deb::{Deb, DebDefaults},
    error::ShipError,
    meta::PackageMeta,
    platform::Platform,
    rpm::{Rpm, RpmDefaults},
};

/// A package format writer.
///
/// Writers collect files, take on package metadata, and serialize the whole
/// package in one pass. Each instance builds exactly one package.
pub trait Archive {
    /// Add a file at `path`, replacing any earlier file at the same path
    fn add(&mut self, path: &str, mode: u32, data: Vec<u8>);
    /// The file name of the finished package
    fn name(&self) -> String;
    /// Map generic metadata onto the format's own fields
    fn absorb_metadata(&mut self, meta: &PackageMeta) -> Result<()>;
    /// Serialize the package to `out`
    fn write_to(&self, out: &mut dyn Write) -> Result<()>;
}

/// Per-format defaults handed to writers at construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    #[allow(missing_docs)]
    pub deb: DebDefaults,
    #[allow(missing_docs)]
    pub rpm: RpmDefaults,
}

/// The supported package formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    /// Debian binary package
    Deb,
    /// RPM lead only; see [`Rpm`]
    Rpm,
}

impl Format {
    /// Every supported format, in name order
    pub const ALL: [Format; 2] = [Format::Deb, Format::Rpm];

    /// The identifier used in config files
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Deb => "deb",
            Format::Rpm => "rpm",
        }
    }

    /// Construct a writer for this format
    pub fn archive(
        self,
        name: &str,
        version: &str,
        platform: &Platform,
        defaults: &Defaults,
    ) -> Result<Box<dyn Archive>> {
        Ok(match self {
            Format::Deb => Box::new(Deb::new(name, version, platform, &defaults.deb)),
            Format::Rpm => Box::new(Rpm::new(name, version, platform, &defaults.rpm)?),
        })
    }
}

impl FromStr for Format {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deb" => Ok(Format::Deb),
            "rpm" => Ok(Format::Rpm),
            other => Err(ShipError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
