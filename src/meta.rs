use std::{env, ffi::CStr, io, ptr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ShipError;

/// Who builds the packages; shared by every package in a config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    /// Full name of the author or vendor
    pub author:   String,
    /// Contact address
    pub email:    String,
    /// Project URL
    pub homepage: String,
}

impl Meta {
    /// Fill in the author and email from the current user when unset
    pub fn verify(&mut self) -> Result<()> {
        if self.author.is_empty() {
            self.author = match current_user() {
                Ok(name) => name,
                Err(err) => env::var("USER").map_err(|_| err)?,
            };
        }
        if self.email.is_empty() {
            let user = env::var("USER").unwrap_or_default();
            self.email = format!("{}@{}", user, hostname()?);
        }
        Ok(())
    }

    /// Take every field that is unset here from `defaults`
    pub fn inherit(&mut self, defaults: &Meta) {
        if self.author.is_empty() {
            self.author = defaults.author.clone();
        }
        if self.email.is_empty() {
            self.email = defaults.email.clone();
        }
        if self.homepage.is_empty() {
            self.homepage = defaults.homepage.clone();
        }
    }
}

/// Format-independent package metadata, absorbed by each writer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMeta {
    /// Author, email and homepage
    #[serde(flatten)]
    pub meta:          Meta,
    /// One-line summary
    pub summary:       String,
    /// Long description, free text
    pub description:   String,
    /// Overrides the architecture the writer was built for
    pub arch:          Option<String>,
    #[allow(missing_docs)]
    #[serde(rename = "deb-conflict")]
    pub deb_conflicts: Vec<String>,
    #[allow(missing_docs)]
    #[serde(rename = "deb-requires")]
    pub deb_requires:  Vec<String>,
    #[allow(missing_docs)]
    #[serde(rename = "rpm-conflict")]
    pub rpm_conflicts: Vec<String>,
    #[allow(missing_docs)]
    #[serde(rename = "rpm-requires")]
    pub rpm_requires:  Vec<String>,
}

/// Fails unless `value` is a non-empty run of non-whitespace characters
pub(crate) fn require_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ShipError::InvalidMetadata(format!("{} is empty", field)).into());
    }
    if value.chars().any(char::is_whitespace) {
        return Err(
            ShipError::InvalidMetadata(format!("{} {:?} contains whitespace", field, value)).into(),
        );
    }
    Ok(())
}

/// Fails if `value` would span more than one line
pub(crate) fn single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(
            ShipError::InvalidMetadata(format!("{} {:?} contains a line break", field, value))
                .into(),
        );
    }
    Ok(())
}

fn current_user() -> Result<String> {
    let uid = unsafe { libc::getuid() };
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    let mut found: *mut libc::passwd = ptr::null_mut();
    // SAFETY: every pointer refers to storage that outlives the call
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut found) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc))
            .with_context(|| format!("can't look up user {}", uid));
    }
    if found.is_null() {
        return Err(ShipError::Config(format!("no passwd entry for user {}", uid)).into());
    }
    // SAFETY: getpwuid_r succeeded, so the strings are NUL-terminated inside `buf`
    let gecos = if pwd.pw_gecos.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(pwd.pw_gecos) }
            .to_string_lossy()
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    if !gecos.is_empty() {
        return Ok(gecos);
    }
    Ok(unsafe { CStr::from_ptr(pwd.pw_name) }
        .to_string_lossy()
        .into_owned())
}

fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the length passed is the buffer's length
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).context("can't get hostname");
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}
