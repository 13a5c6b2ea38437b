#![allow(dead_code)]

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use ship::{Archive, Deb, DebDefaults, PackageMeta, Platform};
use tempfile::TempDir;

pub struct Fixture {
    path:     PathBuf,
    _tempdir: TempDir,
}

impl Fixture {
    pub fn blank() -> Self {
        let tempdir = tempfile::tempdir().unwrap();
        Fixture {
            path:     tempdir.path().to_path_buf(),
            _tempdir: tempdir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a source file below the fixture, creating its directories
    pub fn file(&self, rel: &str, mode: u32, data: &[u8]) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }
}

pub struct Member {
    pub name:  String,
    pub mode:  u32,
    pub mtime: u64,
    pub data:  Vec<u8>,
}

pub struct TarEntry {
    pub name:   String,
    pub mode:   u32,
    pub is_dir: bool,
    pub data:   Vec<u8>,
}

/// Split an ar archive into its members
pub fn ar_members(bytes: &[u8]) -> Vec<Member> {
    assert!(bytes.starts_with(b"!<arch>\n"));
    let mut archive = ar::Archive::new(bytes);
    let mut members = Vec::new();
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.unwrap();
        let name = String::from_utf8(entry.header().identifier().to_vec()).unwrap();
        let mode = entry.header().mode();
        let mtime = entry.header().mtime();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        members.push(Member {
            name,
            mode,
            mtime,
            data,
        });
    }
    members
}

/// Read every entry of a gzip-compressed tarball
pub fn tar_entries(bytes: &[u8]) -> Vec<TarEntry> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = String::from_utf8(entry.path_bytes().into_owned()).unwrap();
        let mode = entry.header().mode().unwrap();
        let is_dir = entry.header().entry_type().is_dir();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.push(TarEntry {
            name,
            mode,
            is_dir,
            data,
        });
    }
    entries
}

pub fn member<'a>(members: &'a [Member], name: &str) -> &'a Member {
    members
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("no member {}", name))
}

pub fn entry<'a>(entries: &'a [TarEntry], name: &str) -> &'a TarEntry {
    entries
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("no entry {}", name))
}

/// A Debian package for amd64 Linux with metadata absorbed
pub fn deb(name: &str, version: &str) -> Deb {
    let mut deb = Deb::new(
        name,
        version,
        &Platform::new("amd64", "linux"),
        &DebDefaults::default(),
    );
    deb.absorb_metadata(&PackageMeta::default()).unwrap();
    deb
}

/// Serialize a package at a fixed time
pub fn serialize(deb: &Deb, mtime: u64) -> Vec<u8> {
    let mut out = Vec::new();
    deb.write_at(&mut out, mtime).unwrap();
    out
}

pub fn control_text(package: &[u8]) -> String {
    let members = ar_members(package);
    let entries = tar_entries(&member(&members, "control.tar.gz").data);
    String::from_utf8(entry(&entries, "./control").data.clone()).unwrap()
}
