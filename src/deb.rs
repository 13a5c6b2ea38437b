use std::{
    collections::BTreeSet,
    io::{self, Read, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use flate2::{write::GzEncoder, Compression};
use md5::Md5;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    archive::Archive,
    error::ShipError,
    meta::{require_token, single_line, PackageMeta},
    platform::Platform,
    tree::{Leaf, Tree},
    DIR_MODE, META_MODE,
};

/// Contents of the `debian-binary` member
pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// Column the long description is wrapped at, before indentation
const WRAP_WIDTH: usize = 76;

/// Control fields the metadata does not provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebDefaults {
    /// Archive section
    pub section:  String,
    /// Installation priority
    pub priority: String,
}

impl Default for DebDefaults {
    fn default() -> Self {
        Self {
            section:  "utils".to_string(),
            priority: "optional".to_string(),
        }
    }
}

/// A Debian binary package under construction
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Deb {
    pub package:          String,
    pub version:          String,
    pub section:          String,
    pub priority:         String,
    pub architecture:     String,
    pub conflicts:        Vec<String>,
    pub depends:          Vec<String>,
    pub homepage:         String,
    pub maintainer:       String,
    pub description:      String,
    pub long_description: String,
    tree:                 Tree,
}

impl Deb {
    /// Create an empty package for `platform`
    pub fn new(name: &str, version: &str, platform: &Platform, defaults: &DebDefaults) -> Self {
        Self {
            package:          name.to_string(),
            version:          version.to_string(),
            section:          defaults.section.clone(),
            priority:         defaults.priority.clone(),
            architecture:     debian_arch(&platform.arch),
            conflicts:        Vec::new(),
            depends:          Vec::new(),
            homepage:         String::new(),
            maintainer:       String::new(),
            description:      String::new(),
            long_description: String::new(),
            tree:             Tree::new(),
        }
    }

    /// The files collected so far
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Render the control file for an installed size given in KiB
    pub fn control(&self, installed_size: u64) -> String {
        let mut text = format!(
            "Package: {}\n\
             Version: {}\n\
             Architecture: {}\n\
             Maintainer: {}\n\
             Installed-Size: {}\n\
             Conflicts: {}\n\
             Depends: {}\n\
             Section: {}\n\
             Priority: {}\n\
             Homepage: {}\n\
             Description: {}\n",
            self.package,
            self.version,
            self.architecture,
            self.maintainer,
            installed_size,
            self.conflicts.join(", "),
            self.depends.join(", "),
            self.section,
            self.priority,
            self.homepage,
            self.description,
        );
        text.push_str(&long_description(&self.long_description));
        text
    }

    /// Serialize with every timestamp set to `mtime` (seconds since the epoch)
    pub fn write_at(&self, out: &mut dyn Write, mtime: u64) -> Result<()> {
        let (data, md5sums, size) = self.data_tarball(mtime)?;
        let control = self.control_tarball(mtime, size, &md5sums)?;
        debug!(
            package = %self.package,
            files = self.tree.len(),
            size,
            "assembled data.tar.gz ({} bytes) and control.tar.gz ({} bytes)",
            data.len(),
            control.len()
        );

        let mut deb = ar::Builder::new(out);
        add_ar_file(&mut deb, mtime, "debian-binary", DEBIAN_BINARY)
            .map_err(ShipError::io("can't pack debian-binary"))?;
        add_ar_file(&mut deb, mtime, "control.tar.gz", &control)
            .map_err(ShipError::io("can't add control.tar.gz to deb"))?;
        add_ar_file(&mut deb, mtime, "data.tar.gz", &data)
            .map_err(ShipError::io("can't add data.tar.gz to deb"))?;
        Ok(())
    }

    /// Builds data.tar.gz, returning it with the md5sums file and the total file size
    fn data_tarball(&self, mtime: u64) -> Result<(Vec<u8>, Vec<u8>, u64)> {
        let mut out = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut dirs = BTreeSet::new();
        let mut md5sums = String::new();
        let mut size = 0;

        for leaf in self.tree.leaves() {
            if leaf.key().is_empty() {
                return Err(ShipError::InvalidMetadata(format!(
                    "file path {:?} names the package root",
                    leaf.name()
                ))
                .into());
            }
            md5sums.push_str(&format!("{}  {}\n", leaf.checksum::<Md5>(), leaf.key()));
            add_tar_dirs(&mut out, mtime, leaf, &mut dirs).map_err(ShipError::io(format!(
                "can't write directory headers for {} to data.tar.gz",
                leaf.key()
            )))?;
            let mut header = tar_header(
                tar::EntryType::Regular,
                leaf.mode() & 0o7777,
                mtime,
                leaf.data().len() as u64,
            );
            let name = entry_name(leaf.is_absolute(), leaf.key());
            append(&mut out, &mut header, &name, leaf.data()).map_err(ShipError::io(format!(
                "writing data.tar.gz header for {}",
                leaf.key()
            )))?;
            size += leaf.data().len() as u64;
        }

        let zip = out
            .into_inner()
            .map_err(ShipError::io("can't close data.tar.gz"))?;
        let buf = zip
            .finish()
            .map_err(ShipError::io("can't close data.tar.gz compressor"))?;
        Ok((buf, md5sums.into_bytes(), size))
    }

    fn control_tarball(&self, mtime: u64, size: u64, md5sums: &[u8]) -> Result<Vec<u8>> {
        let control = self.control(size / 1024);
        let mut out = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        for (name, body) in [("./control", control.as_bytes()), ("./md5sums", md5sums)] {
            let mut header = tar_header(tar::EntryType::Regular, META_MODE, mtime, body.len() as u64);
            append(&mut out, &mut header, name, body).map_err(ShipError::io(format!(
                "can't write {} file to control.tar.gz",
                &name[2..]
            )))?;
        }

        let zip = out
            .into_inner()
            .map_err(ShipError::io("closing control.tar.gz"))?;
        Ok(zip
            .finish()
            .map_err(ShipError::io("closing control.tar.gz compressor"))?)
    }
}

impl Archive for Deb {
    fn add(&mut self, path: &str, mode: u32, data: Vec<u8>) {
        self.tree.add(path, mode, data)
    }

    fn name(&self) -> String {
        format!("{}_{}_{}.deb", self.package, self.version, self.architecture)
    }

    fn absorb_metadata(&mut self, meta: &PackageMeta) -> Result<()> {
        require_token("package name", &self.package)?;
        require_token("version", &self.version)?;
        if let Some(arch) = &meta.arch {
            require_token("architecture", arch)?;
            self.architecture = debian_arch(arch);
        }

        let who = &meta.meta;
        let maintainer = match (who.author.is_empty(), who.email.is_empty()) {
            (false, false) => format!("{} <{}>", who.author, who.email),
            (true, false) => who.email.clone(),
            (_, true) => who.author.clone(),
        };
        single_line("maintainer", &maintainer)?;
        single_line("homepage", &who.homepage)?;
        single_line("summary", &meta.summary)?;
        for relation in meta.deb_conflicts.iter().chain(&meta.deb_requires) {
            single_line("package relation", relation)?;
        }

        self.maintainer = maintainer;
        self.homepage = who.homepage.clone();
        self.description = meta.summary.clone();
        self.long_description = meta.description.clone();
        self.conflicts = meta.deb_conflicts.clone();
        self.depends = meta.deb_requires.clone();
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.write_at(out, now)
    }
}

/// Wraps, indents and joins paragraphs the way dpkg expects extended descriptions
fn long_description(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = String::new();
    let paragraphs = lines
        .split(|line| line.trim().is_empty())
        .filter(|paragraph| !paragraph.is_empty());
    for (i, paragraph) in paragraphs.enumerate() {
        if i > 0 {
            out.push_str(" .\n");
        }
        for line in wrap(&paragraph.join(" "), WRAP_WIDTH) {
            out.push_str("  ");
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

/// Greedy word wrap; words longer than `width` get a line of their own
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Debian spells the 32-bit x86 architecture `i386`
fn debian_arch(arch: &str) -> String {
    match arch {
        "386" => "i386".to_string(),
        other => other.to_string(),
    }
}

fn entry_name(absolute: bool, key: &str) -> String {
    if absolute {
        format!("./{}", key)
    } else {
        key.to_string()
    }
}

fn tar_header(kind: tar::EntryType, mode: u32, mtime: u64, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Appends an entry, keeping `name` byte for byte when it fits the header.
///
/// `tar::Header::set_path` drops `./` prefixes, which dpkg-built packages
/// carry, so short names are copied into the name field directly. Longer
/// names go through a GNU long-name record.
fn append<W: Write, R: Read>(
    out: &mut tar::Builder<W>,
    header: &mut tar::Header,
    name: &str,
    data: R,
) -> io::Result<()> {
    let bytes = name.as_bytes();
    let slot = &mut header.as_old_mut().name;
    if bytes.len() <= slot.len() {
        slot[..bytes.len()].copy_from_slice(bytes);
        header.set_cksum();
        out.append(header, data)
    } else {
        out.append_data(header, name, data)
    }
}

/// Emits every ancestor directory of `leaf` that has not been emitted yet, root first
fn add_tar_dirs<W: Write>(
    out: &mut tar::Builder<W>,
    mtime: u64,
    leaf: &Leaf,
    dirs: &mut BTreeSet<String>,
) -> io::Result<()> {
    let mut names = Vec::new();
    if leaf.is_absolute() {
        names.push("./".to_string());
    }
    let parts: Vec<&str> = leaf.key().split('/').collect();
    for depth in 1..parts.len() {
        let dir = format!("{}/", parts[..depth].join("/"));
        names.push(entry_name(leaf.is_absolute(), &dir));
    }

    for name in names {
        if dirs.contains(&name) {
            continue;
        }
        let mut header = tar_header(tar::EntryType::Directory, DIR_MODE, mtime, 0);
        append(out, &mut header, &name, io::empty())?;
        dirs.insert(name);
    }
    Ok(())
}

fn add_ar_file<W: Write>(
    out: &mut ar::Builder<W>,
    mtime: u64,
    name: &str,
    body: &[u8],
) -> io::Result<()> {
    let mut header = ar::Header::new(name.as_bytes().to_vec(), body.len() as u64);
    header.set_mode(META_MODE);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    out.append(&header, body)
}
