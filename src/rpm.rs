use std::{collections::BTreeMap, io::Write};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    archive::Archive,
    error::ShipError,
    meta::{require_token, PackageMeta},
    platform::Platform,
    tree::Tree,
};

/// First four bytes of every RPM file
pub const RPM_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
/// Encoded size of a [`Lead`]
pub const LEAD_SIZE: usize = 96;
/// Lead type of a binary package
pub const BINARY_RPM: u16 = 0x0000;
/// Lead type of a source package
pub const SOURCE_RPM: u16 = 0x0001;

const NAME_SIZE: usize = 66;

/// How one architecture is spelled in an RPM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmArch {
    /// Lead architecture code (see rpmrc)
    pub code: u16,
    /// Architecture in the file name
    pub name: String,
}

/// Lookup tables and fields the metadata does not provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmDefaults {
    /// Package group
    pub group: String,
    /// Architectures by platform name
    pub arch:  BTreeMap<String, RpmArch>,
    /// Operating system codes by platform name
    pub os:    BTreeMap<String, u16>,
}

impl Default for RpmDefaults {
    fn default() -> Self {
        let arch = [("386", 1, "i386"), ("amd64", 1, "x86_64"), ("arm", 12, "armv7hl")]
            .into_iter()
            .map(|(platform, code, name)| {
                (platform.to_string(), RpmArch {
                    code,
                    name: name.to_string(),
                })
            })
            .collect();
        let os = [("linux", 1), ("freebsd", 8), ("darwin", 21)]
            .into_iter()
            .map(|(platform, code)| (platform.to_string(), code))
            .collect();
        Self {
            group: "Applications/Internet".to_string(),
            arch,
            os,
        }
    }
}

impl RpmDefaults {
    fn arch(&self, name: &str) -> Result<&RpmArch, ShipError> {
        self.arch
            .get(name)
            .ok_or_else(|| ShipError::UnsupportedPlatform {
                kind:  "architecture",
                value: name.to_string(),
            })
    }

    fn os(&self, name: &str) -> Result<u16, ShipError> {
        self.os
            .get(name)
            .copied()
            .ok_or_else(|| ShipError::UnsupportedPlatform {
                kind:  "operating system",
                value: name.to_string(),
            })
    }
}

/// The legacy fixed-size record at the start of an RPM file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Lead {
    pub magic:          [u8; 4],
    pub major:          u8,
    pub minor:          u8,
    /// [`BINARY_RPM`] or [`SOURCE_RPM`]
    pub kind:           u16,
    pub arch:           u16,
    /// NUL-padded, always NUL-terminated
    pub name:           [u8; NAME_SIZE],
    pub os:             u16,
    pub signature_type: u16,
    pub reserved:       [u8; 16],
}

impl Lead {
    /// A binary package lead; `name` is cut to 65 bytes
    pub fn new(name: &str, arch: u16, os: u16) -> Self {
        let mut lead = Self {
            magic: RPM_MAGIC,
            major: 3,
            minor: 0,
            kind: BINARY_RPM,
            arch,
            name: [0; NAME_SIZE],
            os,
            signature_type: 0,
            reserved: [0; 16],
        };
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE - 1);
        lead.name[..len].copy_from_slice(&bytes[..len]);
        lead
    }

    /// The name field up to its terminator
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Encode with big-endian integers
    pub fn to_bytes(&self) -> [u8; LEAD_SIZE] {
        let mut buf = [0u8; LEAD_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.major;
        buf[5] = self.minor;
        buf[6..8].copy_from_slice(&self.kind.to_be_bytes());
        buf[8..10].copy_from_slice(&self.arch.to_be_bytes());
        buf[10..76].copy_from_slice(&self.name);
        buf[76..78].copy_from_slice(&self.os.to_be_bytes());
        buf[78..80].copy_from_slice(&self.signature_type.to_be_bytes());
        buf[80..96].copy_from_slice(&self.reserved);
        buf
    }

    /// Decode a lead from the start of `buf`
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let buf = buf.get(..LEAD_SIZE).ok_or_else(|| {
            ShipError::InvalidLead(format!("need {} bytes, got {}", LEAD_SIZE, buf.len()))
        })?;
        if buf[0..4] != RPM_MAGIC {
            return Err(ShipError::InvalidLead(format!("bad magic {:02x?}", &buf[0..4])).into());
        }
        let be = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
        let mut lead = Self {
            magic:          RPM_MAGIC,
            major:          buf[4],
            minor:          buf[5],
            kind:           be(6),
            arch:           be(8),
            name:           [0; NAME_SIZE],
            os:             be(76),
            signature_type: be(78),
            reserved:       [0; 16],
        };
        lead.name.copy_from_slice(&buf[10..76]);
        lead.reserved.copy_from_slice(&buf[80..96]);
        Ok(lead)
    }
}

/// An RPM package under construction.
///
/// Only the lead is ever written: there is no signature, header section or
/// payload, so the output identifies a package but cannot be installed.
/// Added files and descriptive fields are kept but not serialized.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Rpm {
    pub package:     String,
    pub version:     String,
    pub group:       String,
    pub arch:        String,
    pub conflicts:   Vec<String>,
    pub requires:    Vec<String>,
    pub url:         String,
    pub vendor:      String,
    pub summary:     String,
    pub description: String,
    arch_code:       u16,
    os_code:         u16,
    defaults:        RpmDefaults,
    tree:            Tree,
}

impl Rpm {
    /// Create an empty package, failing if `platform` has no RPM codes
    pub fn new(
        name: &str,
        version: &str,
        platform: &Platform,
        defaults: &RpmDefaults,
    ) -> Result<Self> {
        let arch = defaults.arch(&platform.arch)?;
        let os_code = defaults.os(&platform.os)?;
        Ok(Self {
            package: name.to_string(),
            version: version.to_string(),
            group: defaults.group.clone(),
            arch: arch.name.clone(),
            conflicts: Vec::new(),
            requires: Vec::new(),
            url: String::new(),
            vendor: String::new(),
            summary: String::new(),
            description: String::new(),
            arch_code: arch.code,
            os_code,
            defaults: defaults.clone(),
            tree: Tree::new(),
        })
    }

    /// The files collected so far
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The lead this package serializes to
    pub fn lead(&self) -> Lead {
        Lead::new(&self.name(), self.arch_code, self.os_code)
    }
}

impl Archive for Rpm {
    fn add(&mut self, path: &str, mode: u32, data: Vec<u8>) {
        self.tree.add(path, mode, data)
    }

    fn name(&self) -> String {
        format!("{}-{}.{}.rpm", self.package, self.version, self.arch)
    }

    fn absorb_metadata(&mut self, meta: &PackageMeta) -> Result<()> {
        require_token("package name", &self.package)?;
        require_token("version", &self.version)?;
        if let Some(arch) = &meta.arch {
            let arch = self.defaults.arch(arch)?;
            self.arch = arch.name.clone();
            self.arch_code = arch.code;
        }
        self.vendor = meta.meta.author.clone();
        self.url = meta.meta.homepage.clone();
        self.summary = meta.summary.clone();
        self.description = meta.description.clone();
        self.conflicts = meta.rpm_conflicts.clone();
        self.requires = meta.rpm_requires.clone();
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        if !self.tree.is_empty() {
            warn!(
                package = %self.package,
                files = self.tree.len(),
                "rpm payloads are not written; only the lead is emitted"
            );
        }
        out.write_all(&self.lead().to_bytes())
            .map_err(ShipError::io("rpm: error writing header"))?;
        Ok(())
    }
}
