use std::{
    cmp::Ordering,
    collections::BTreeMap,
    env,
    fs::{self, File},
    io::{BufWriter, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{
    archive::{Archive, Defaults, Format},
    error::ShipError,
    meta::{Meta, PackageMeta},
    platform::Platform,
};

/// A config file: package definitions plus settings they share
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package definitions by name
    pub package:  BTreeMap<String, Package>,
    /// Defaults for every package's metadata
    pub meta:     Meta,
    /// Per-format defaults
    pub defaults: Defaults,
    /// Platform packages are built for; the host unless overridden
    pub platform: Platform,
}

impl Config {
    /// Read a config file. YAML is a superset of JSON, so `ship.json` parses as is
    pub fn load(path: &Path) -> Result<Config> {
        let buf = fs::read(path).with_context(|| format!("error reading {:?}", path))?;
        Config::from_slice(&buf).with_context(|| format!("error parsing {:?}", path))
    }

    /// Parse a config from memory
    pub fn from_slice(buf: &[u8]) -> Result<Config> {
        Ok(serde_yaml::from_slice(buf)?)
    }

    /// Fill in defaults and check every package definition
    pub fn verify(&mut self) -> Result<()> {
        if self.package.is_empty() {
            return Err(ShipError::Config("no packages defined".to_string()).into());
        }
        self.meta.verify()?;
        let cwd = env::current_dir()?;
        for (name, pkg) in self.package.iter_mut() {
            pkg.verify(name, &self.meta, &cwd)
                .with_context(|| format!("package {}", name))?;
        }
        Ok(())
    }

    /// Build the named packages (all when `names` is empty) into `output_dir`
    pub fn build(&self, names: &[String], output_dir: &Path) -> Result<Vec<PathBuf>> {
        if let Some(unknown) = names.iter().find(|n| !self.package.contains_key(*n)) {
            return Err(ShipError::Config(format!("no package named {:?}", unknown)).into());
        }
        let mut artifacts = Vec::new();
        for (name, pkg) in &self.package {
            if !names.is_empty() && !names.contains(name) {
                continue;
            }
            info!("building {} {}", pkg.name, pkg.version);
            artifacts.extend(pkg.build(&self.platform, &self.defaults, output_dir)?);
        }
        Ok(artifacts)
    }
}

/// Where matched files go, written either as a bare string or a table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTarget")]
pub struct Target {
    /// Destination directory inside the package
    pub target: String,
    /// Overrides the mode of every file added through this entry
    pub mode:   Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Path(String),
    Table {
        target: String,
        #[serde(default)]
        mode:   Option<String>,
    },
}

impl TryFrom<RawTarget> for Target {
    type Error = String;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        match raw {
            RawTarget::Path(target) => Ok(Target { target, mode: None }),
            RawTarget::Table { target, mode } => {
                let mode = match mode {
                    Some(m) => Some(
                        u32::from_str_radix(m.trim_start_matches("0o"), 8)
                            .map_err(|_| format!("invalid mode {:?}", m))?,
                    ),
                    None => None,
                };
                Ok(Target { target, mode })
            }
        }
    }
}

/// A file resolved from the manifest, ready to be added to writers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Destination path in the package
    pub dst:  String,
    /// Source path on disk
    pub src:  PathBuf,
    /// Permission bits
    pub mode: u32,
    /// Contents
    pub data: Vec<u8>,
}

/// One package definition from the config file
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Package {
    /// Source patterns mapped to destinations
    pub manifest: BTreeMap<String, Target>,
    /// Descriptive metadata
    pub meta:     PackageMeta,
    /// Package name; defaults to the definition's key
    pub name:     String,
    /// Directory manifest patterns are relative to
    pub path:     PathBuf,
    /// Git repository for version detection
    pub repo:     PathBuf,
    /// Branch whose commits are counted for `version: git`
    pub branch:   String,
    /// A version, or `git` / `git-tag` to derive one
    pub version:  String,
    /// Commands run before the manifest is resolved
    pub generate: Vec<String>,
    /// Format identifiers to build
    pub formats:  Vec<String>,
    /// Glob patterns of source paths to leave out
    pub ignore:   Vec<String>,
    #[serde(skip)]
    ignore_patterns: Vec<Regex>,
}

impl Package {
    /// Fill in defaults, derive the version and compile ignore patterns
    pub fn verify(&mut self, name: &str, meta: &Meta, cwd: &Path) -> Result<()> {
        if self.name.is_empty() {
            self.name = name.to_string();
        }
        self.path = if self.path.as_os_str().is_empty() {
            cwd.to_path_buf()
        } else {
            cwd.join(&self.path)
        };
        self.meta.meta.inherit(meta);
        self.repo = if self.repo.as_os_str().is_empty() {
            self.path.clone()
        } else {
            self.path.join(&self.repo)
        };
        if self.branch.is_empty() {
            self.branch = "master".to_string();
        }
        if self.formats.is_empty() {
            self.formats = Format::ALL.iter().map(|f| f.to_string()).collect();
        }
        self.formats.sort();

        let derived = match self.version.as_str() {
            "git" => Some(self.git_version()?),
            "git-tag" => Some(self.git_tag_version()?),
            "" => {
                return Err(ShipError::Config(
                    "empty version and no version detection method specified".to_string(),
                )
                .into())
            }
            _ => None,
        };
        if let Some(version) = derived {
            self.version = version;
        }

        self.ignore_patterns = self
            .ignore
            .iter()
            .map(|glob| {
                glob_regex(glob, true)
                    .map_err(|err| ShipError::Config(format!("{}: invalid: {}", glob, err)))
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Run the generate commands, then write one package per format
    pub fn build(
        &self,
        platform: &Platform,
        defaults: &Defaults,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        for run in &self.generate {
            self.run_generate(run)?;
        }
        let files = self.resolve_manifest()?;

        let mut artifacts = Vec::new();
        for format in &self.formats {
            let format: Format = format.parse()?;
            let mut out = format.archive(&self.name, &self.version, platform, defaults)?;
            out.absorb_metadata(&self.meta)?;
            for file in &files {
                out.add(&file.dst, file.mode, file.data.clone());
            }
            artifacts.push(write_archive(out.as_ref(), output_dir)?);
        }
        Ok(artifacts)
    }

    /// Expand every manifest pattern into the files it adds
    pub fn resolve_manifest(&self) -> Result<Vec<ManifestFile>> {
        if self.manifest.is_empty() {
            return Err(ShipError::Config("empty manifest".to_string()).into());
        }
        let mut files = Vec::new();
        for (pattern, target) in &self.manifest {
            let sources = self.glob(pattern)?;
            if sources.is_empty() {
                return Err(
                    ShipError::Config(format!("{}: did not match any files", pattern)).into(),
                );
            }
            for rel in sources {
                let dst = join_dst(&target.target, &rel.to_string_lossy());
                self.add_source(&mut files, &dst, &self.path.join(&rel), target.mode)?;
            }
        }
        Ok(files)
    }

    fn ignored(&self, src: &Path) -> bool {
        let src = src.to_string_lossy();
        self.ignore_patterns.iter().any(|re| re.is_match(&src))
    }

    /// Paths below the package directory matching `pattern`, relative to it
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let re = glob_regex(pattern, false)
            .map_err(|err| ShipError::Config(format!("{}: invalid pattern: {}", pattern, err)))?;
        let depth = pattern.split('/').count();
        let mut matches = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            let rel = entry.path().strip_prefix(&self.path)?;
            if re.is_match(&rel.to_string_lossy()) {
                matches.push(rel.to_path_buf());
            }
        }
        Ok(matches)
    }

    fn add_source(
        &self,
        files: &mut Vec<ManifestFile>,
        dst: &str,
        src: &Path,
        mode: Option<u32>,
    ) -> Result<()> {
        if self.ignored(src) {
            info!("< ignore > {}", dst);
            return Ok(());
        }
        let meta = fs::metadata(src).with_context(|| format!("can't stat {:?}", src))?;
        if !meta.is_dir() {
            let mode = mode.unwrap_or(meta.permissions().mode() & 0o7777);
            files.push(ManifestFile::read(dst, src, mode)?);
            return Ok(());
        }

        let walk = WalkDir::new(src)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|entry| {
                let skip = self.ignored(entry.path());
                if skip {
                    info!("< ignore > {}", entry.path().display());
                }
                !skip
            });
        for entry in walk {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry.path().strip_prefix(src)?;
            let child = join_dst(dst, &rel.to_string_lossy());
            let mode = match mode {
                Some(mode) => mode,
                None => entry.metadata()?.permissions().mode() & 0o7777,
            };
            files.push(ManifestFile::read(&child, entry.path(), mode)?);
        }
        Ok(())
    }

    fn run_generate(&self, run: &str) -> Result<()> {
        let mut fields = run.split_whitespace();
        let base = match fields.next() {
            Some(base) => base,
            None => return Ok(()),
        };
        info!("generate {}", run);
        let output = Command::new(base)
            .args(fields)
            .current_dir(&self.path)
            .output()
            .with_context(|| format!("error running {:?}", run))?;
        if !output.status.success() {
            return Err(ShipError::Command {
                command: run.to_string(),
                status:  output.status.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .with_context(|| format!("can't get git repository at {:?}", self.repo))?;
        if !output.status.success() {
            return Err(ShipError::Command {
                command: format!("git {}", args.join(" ")),
                status:  String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Number of commits on the branch
    fn git_version(&self) -> Result<String> {
        self.git(&["rev-list", "--count", self.branch.as_str()])
            .with_context(|| format!("can't get commit count of {}", self.branch))
    }

    /// The highest tag by version ordering
    fn git_tag_version(&self) -> Result<String> {
        let tags = self.git(&["tag", "--list"])?;
        tags.lines()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .max_by(|a, b| compare_versions(a, b))
            .map(str::to_string)
            .ok_or_else(|| {
                ShipError::Config(format!("no git tags in repository {:?}", self.repo)).into()
            })
    }
}

impl ManifestFile {
    fn read(dst: &str, src: &Path, mode: u32) -> Result<Self> {
        let data = fs::read(src).with_context(|| format!("can't read {:?}", src))?;
        debug!("{:o} {}", mode, dst);
        Ok(Self {
            dst: dst.to_string(),
            src: src.to_path_buf(),
            mode,
            data,
        })
    }
}

/// Serializes `out` into `dir`, replacing the artifact only once it is complete
fn write_archive(out: &dyn Archive, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(out.name());
    let partial = dir.join(format!("{}.partial", out.name()));
    info!("           {}", out.name());

    let written = (|| -> Result<()> {
        let mut w = BufWriter::new(File::create(&partial)?);
        out.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(err.context(format!("writing {:?}", path)));
    }
    fs::rename(&partial, &path)?;
    Ok(path)
}

fn join_dst(target: &str, rel: &str) -> String {
    if target.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", target.trim_end_matches('/'), rel)
    }
}

/// Translates a `*`/`?` glob into an anchored regex. Unless `cross` is set,
/// wildcards stop at `/`.
fn glob_regex(glob: &str, cross: bool) -> Result<Regex, regex::Error> {
    let (any, one) = if cross { (".*", ".") } else { ("[^/]*", "[^/]") };
    let mut expr = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => expr.push_str(any),
            '?' => expr.push_str(one),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart<'a> {
    Text(&'a str),
    Number(u64),
}

/// Splits a version into alternating text and numeric runs
fn version_parts(version: &str) -> Vec<VersionPart<'_>> {
    let version = version.trim_start_matches(['v', 'V']);
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = version.as_bytes();
    while start < bytes.len() {
        let digit = bytes[start].is_ascii_digit();
        let end = bytes[start..]
            .iter()
            .position(|b| b.is_ascii_digit() != digit)
            .map_or(bytes.len(), |n| start + n);
        let run = &version[start..end];
        parts.push(match run.parse() {
            Ok(n) if digit => VersionPart::Number(n),
            _ => VersionPart::Text(run),
        });
        start = end;
    }
    parts
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    version_parts(a).cmp(&version_parts(b))
}
