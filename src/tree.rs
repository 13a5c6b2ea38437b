use std::{collections::BTreeMap, path::Path};

use anyhow::Result;
use lexiclean::Lexiclean;
use md5::Digest;

use crate::{error::ShipError, DIR_MODE};

/// One packaged file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    name: String,
    mode: u32,
    data: Vec<u8>,
}

impl Leaf {
    /// The destination path as it was added, lexically cleaned
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The destination path relative to the package root
    pub fn key(&self) -> &str {
        self.name.trim_start_matches('/')
    }
    /// Whether the destination was given as an absolute path
    pub fn is_absolute(&self) -> bool {
        self.name.starts_with('/')
    }
    /// Permission bits
    pub fn mode(&self) -> u32 {
        self.mode
    }
    /// The file's contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    /// Hex digest of the contents under `D`
    pub fn checksum<D: Digest>(&self) -> String {
        hex::encode(D::digest(&self.data))
    }

    fn info(&self, name: &str) -> FileInfo {
        FileInfo {
            name:   name.to_string(),
            mode:   self.mode,
            size:   self.data.len() as u64,
            is_dir: false,
        }
    }
}

/// What `stat` and `read_dir` report about a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Last path component ("/" for the root)
    pub name:   String,
    /// Permission bits; synthesized directories are always 0755
    pub mode:   u32,
    /// Content length, zero for directories
    pub size:   u64,
    /// Set for synthesized directories
    pub is_dir: bool,
}

impl FileInfo {
    fn dir(name: &str) -> FileInfo {
        FileInfo {
            name:   name.to_string(),
            mode:   DIR_MODE,
            size:   0,
            is_dir: true,
        }
    }
}

/// The files destined for a package.
///
/// Only files are stored. Directories exist implicitly for every ancestor of
/// a stored path, so the directory structure can never disagree with the
/// file set. Keys are package-root relative: `/usr/bin/x` and `usr/bin/x`
/// address the same entry.
#[derive(Debug, Default, Clone)]
pub struct Tree {
    leaves: BTreeMap<String, Leaf>,
}

/// Lexically cleans `path`, keeping a leading slash if there was one.
/// Leading `..` components are dropped: nothing lies above the package root.
fn clean(path: &str) -> String {
    let cleaned = Path::new(path).lexiclean();
    let cleaned = cleaned.to_string_lossy();
    let rest = cleaned
        .trim_start_matches('/')
        .split('/')
        .skip_while(|part| *part == ".." || *part == ".")
        .collect::<Vec<_>>()
        .join("/");
    if cleaned.starts_with('/') {
        format!("/{}", rest)
    } else {
        rest
    }
}

fn key_of(path: &str) -> String {
    clean(path).trim_start_matches('/').to_string()
}

/// Returns what is left of `key` below `dir`, if `key` lies below it
fn below<'a>(key: &'a str, dir: &str) -> Option<&'a str> {
    if dir.is_empty() {
        return Some(key);
    }
    key.strip_prefix(dir)?.strip_prefix('/')
}

impl Tree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing whatever was stored at the same path. A path that
    /// cleans to the root is stored too; writers refuse to serialize it.
    pub fn add(&mut self, path: &str, mode: u32, data: Vec<u8>) {
        let name = clean(path);
        let key = name.trim_start_matches('/').to_string();
        self.leaves.insert(key, Leaf { name, mode, data });
    }

    /// Look up the file stored at exactly `path`
    pub fn resolve(&self, path: &str) -> Result<&Leaf> {
        self.leaves
            .get(&key_of(path))
            .ok_or_else(|| ShipError::NotFound(path.to_string()).into())
    }

    /// Describe a stored file, or a directory implied by the stored files
    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        let key = key_of(path);
        // A leaf added as "/" never shadows the root directory
        if let Some(leaf) = self.leaves.get(&key).filter(|_| !key.is_empty()) {
            return Ok(leaf.info(basename(&key)));
        }
        let occupied = self
            .leaves
            .keys()
            .any(|k| matches!(below(k, &key), Some(rest) if !rest.is_empty()));
        match (occupied, key.is_empty()) {
            (false, _) => Err(ShipError::NotFound(path.to_string()).into()),
            (true, true) => Ok(FileInfo::dir("/")),
            (true, false) => Ok(FileInfo::dir(basename(&key))),
        }
    }

    /// List the immediate children of `path`, sorted by name
    pub fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let dir = key_of(path);
        let mut found: BTreeMap<&str, FileInfo> = BTreeMap::new();
        for (key, leaf) in &self.leaves {
            let rest = match below(key, &dir) {
                Some(rest) if !rest.is_empty() => rest,
                _ => continue,
            };
            // Keys are visited in order, so the first claim on a name sticks
            match rest.split_once('/') {
                Some((child, _)) => {
                    found.entry(child).or_insert_with(|| FileInfo::dir(child));
                }
                None => {
                    found.entry(rest).or_insert_with(|| leaf.info(rest));
                }
            }
        }
        if found.is_empty() {
            return Err(ShipError::NotFound(path.to_string()).into());
        }
        Ok(found.into_values().collect())
    }

    /// Iterate over the stored files in path order
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.leaves.values()
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether no files have been added
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Sum of the stored files' content lengths
    pub fn total_size(&self) -> u64 {
        self.leaves.values().map(|l| l.data.len() as u64).sum()
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
