use std::io::{self, Write};

use md5::{Digest, Md5};
use pretty_assertions::assert_eq;
use ship::{Archive, Deb, DebDefaults, Meta, PackageMeta, Platform, ShipError};

mod common;
use common::{ar_members, control_text, deb, entry, member, serialize, tar_entries};

#[test]
fn demo_package() {
    let mut deb = deb("demo", "1.0");
    deb.add("bin/app", 0o755, b"#!/bin/sh".to_vec());
    assert_eq!(deb.name(), "demo_1.0_amd64.deb");

    let package = serialize(&deb, 1_600_000_000);
    let members = ar_members(&package);
    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
    for m in &members {
        assert_eq!(m.mode, 0o644);
        assert_eq!(m.mtime, 1_600_000_000);
    }
    assert_eq!(members[0].data, b"2.0\n");

    let data = tar_entries(&member(&members, "data.tar.gz").data);
    let listing: Vec<(&str, bool)> = data.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
    assert_eq!(listing, vec![("bin/", true), ("bin/app", false)]);
    assert_eq!(data[0].mode, 0o755);
    assert_eq!(data[1].mode, 0o755);
    assert_eq!(data[1].data, b"#!/bin/sh");

    let control = tar_entries(&member(&members, "control.tar.gz").data);
    let control_names: Vec<&str> = control.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(control_names, vec!["./control", "./md5sums"]);
    let md5sums = String::from_utf8(control[1].data.clone()).unwrap();
    assert_eq!(
        md5sums,
        format!("{}  bin/app\n", hex::encode(Md5::digest(b"#!/bin/sh")))
    );
}

#[test]
fn absolute_paths_are_dot_relative() {
    let mut deb = deb("demo", "1.0");
    deb.add("/usr/bin/app", 0o755, b"app".to_vec());
    deb.add("/usr/share/doc/demo/copyright", 0o644, b"MIT".to_vec());
    deb.add("/etc/demo.conf", 0o640, b"x=1".to_vec());

    let members = ar_members(&serialize(&deb, 0));
    let data = tar_entries(&member(&members, "data.tar.gz").data);
    let listing: Vec<&str> = data.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(listing, vec![
        "./",
        "./etc/",
        "./etc/demo.conf",
        "./usr/",
        "./usr/bin/",
        "./usr/bin/app",
        "./usr/share/",
        "./usr/share/doc/",
        "./usr/share/doc/demo/",
        "./usr/share/doc/demo/copyright",
    ]);
    assert_eq!(entry(&data, "./etc/demo.conf").mode, 0o640);

    let control = tar_entries(&member(&members, "control.tar.gz").data);
    let md5sums = String::from_utf8(entry(&control, "./md5sums").data.clone()).unwrap();
    let paths: Vec<&str> = md5sums
        .lines()
        .map(|l| l.split_once("  ").unwrap().1)
        .collect();
    assert_eq!(paths, vec![
        "etc/demo.conf",
        "usr/bin/app",
        "usr/share/doc/demo/copyright"
    ]);
}

#[test]
fn directories_precede_descendants() {
    let mut deb = deb("deep", "2");
    deb.add("/a/b/c/d.txt", 0o644, b"d".to_vec());
    deb.add("/a/b/e.txt", 0o644, b"e".to_vec());
    deb.add("/a/f/g.txt", 0o644, b"g".to_vec());
    deb.add("/h.txt", 0o644, b"h".to_vec());

    let members = ar_members(&serialize(&deb, 0));
    let data = tar_entries(&member(&members, "data.tar.gz").data);
    let position = |name: &str| data.iter().position(|e| e.name == name).unwrap();
    for e in data.iter().filter(|e| !e.is_dir) {
        let mut dir = e.name.as_str();
        while let Some(idx) = dir[..dir.len() - 1].rfind('/') {
            dir = &dir[..=idx];
            assert!(position(dir) < position(&e.name), "{} after {}", dir, e.name);
        }
    }
    // Each directory appears once
    let dirs: Vec<&str> = data.iter().filter(|e| e.is_dir).map(|e| e.name.as_str()).collect();
    assert_eq!(dirs, vec!["./", "./a/", "./a/b/", "./a/b/c/", "./a/f/"]);
}

#[test]
fn installed_size_is_truncated_kib() {
    let mut deb = deb("big", "1");
    deb.add("/one", 0o644, vec![0; 1500]);
    deb.add("/two", 0o644, vec![1; 1500]);
    let control = control_text(&serialize(&deb, 0));
    assert!(control.contains("\nInstalled-Size: 2\n"), "{}", control);

    let mut deb = deb_small();
    deb.add("/tiny", 0o644, vec![0; 1023]);
    let control = control_text(&serialize(&deb, 0));
    assert!(twoway::find_str(&control, "Installed-Size: 0\n").is_some());
}

fn deb_small() -> Deb {
    deb("small", "1")
}

#[test]
fn control_file_layout() {
    let mut deb = Deb::new(
        "demo",
        "1.2-3",
        &Platform::new("386", "linux"),
        &DebDefaults::default(),
    );
    deb.absorb_metadata(&PackageMeta {
        meta: Meta {
            author:   "Jane Doe".into(),
            email:    "jane@example.com".into(),
            homepage: "https://example.com/demo".into(),
        },
        summary: "a demo package".into(),
        description: "Demo does many things. ".repeat(6) + "\n\nSecond paragraph.",
        deb_conflicts: vec!["old-demo".into(), "demo-legacy".into()],
        deb_requires: vec!["libc6 (>= 2.17)".into()],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(deb.name(), "demo_1.2-3_i386.deb");

    let expected = "\
Package: demo
Version: 1.2-3
Architecture: i386
Maintainer: Jane Doe <jane@example.com>
Installed-Size: 7
Conflicts: old-demo, demo-legacy
Depends: libc6 (>= 2.17)
Section: utils
Priority: optional
Homepage: https://example.com/demo
Description: a demo package
  Demo does many things. Demo does many things. Demo does many things. Demo
  does many things. Demo does many things. Demo does many things.
 .
  Second paragraph.
";
    assert_eq!(deb.control(7), expected);
}

#[test]
fn custom_defaults() {
    let defaults = DebDefaults {
        section:  "net".into(),
        priority: "extra".into(),
    };
    let deb = Deb::new("n", "1", &Platform::new("arm64", "linux"), &defaults);
    let control = deb.control(0);
    assert!(control.contains("Section: net\nPriority: extra\n"));
    assert!(control.contains("Architecture: arm64\n"));
    assert!(control.ends_with("Description: \n"));
}

#[test]
fn arch_override() {
    let mut deb = deb("demo", "1.0");
    deb.absorb_metadata(&PackageMeta {
        arch: Some("all".into()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(deb.name(), "demo_1.0_all.deb");

    deb.absorb_metadata(&PackageMeta {
        arch: Some("386".into()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(deb.name(), "demo_1.0_i386.deb");
    assert!(deb.control(0).contains("Architecture: i386\n"));
}

#[test]
fn parent_components_are_dropped() {
    let mut deb = deb("escape", "1");
    deb.add("../etc/passwd", 0o644, b"root".to_vec());
    let members = ar_members(&serialize(&deb, 0));
    let data = tar_entries(&member(&members, "data.tar.gz").data);
    let names: Vec<&str> = data.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["etc/", "etc/passwd"]);
}

#[test]
fn root_path_is_rejected() {
    for path in ["", "/"] {
        let mut deb = deb("rooted", "1");
        deb.add(path, 0o644, b"x".to_vec());
        deb.add("/usr/bin/app", 0o755, b"app".to_vec());
        let mut out = Vec::new();
        let err = deb.write_at(&mut out, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ShipError>(),
            Some(ShipError::InvalidMetadata(_))
        ));
        assert!(out.is_empty());
    }
}

/// Accepts `budget` bytes, then fails every write
struct DiskFull {
    budget: usize,
}

impl Write for DiskFull {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn write_failures_name_the_member() {
    let mut deb = deb("full", "1");
    deb.add("/usr/bin/app", 0o755, b"app".to_vec());

    // 8 byte global header, 60 byte member header, then "2.0\n"
    for (budget, expected) in [
        (0, "can't pack debian-binary"),
        (8, "can't pack debian-binary"),
        (100, "can't add control.tar.gz to deb"),
    ] {
        let err = deb.write_at(&mut DiskFull { budget }, 0).unwrap_err();
        match err.downcast_ref::<ShipError>() {
            Some(ShipError::Io { context, source }) => {
                assert_eq!(context, expected);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.to_string(), format!("{}: disk full", expected));
    }
}

#[test]
fn invalid_metadata() {
    let platform = Platform::new("amd64", "linux");
    let defaults = DebDefaults::default();

    let mut deb = Deb::new("", "1.0", &platform, &defaults);
    let err = deb.absorb_metadata(&PackageMeta::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ShipError>(),
        Some(ShipError::InvalidMetadata(_))
    ));

    let mut deb = Deb::new("demo", "1 0", &platform, &defaults);
    assert!(deb.absorb_metadata(&PackageMeta::default()).is_err());

    let mut deb = Deb::new("demo", "1.0", &platform, &defaults);
    let err = deb
        .absorb_metadata(&PackageMeta {
            summary: "two\nlines".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ShipError>(),
        Some(ShipError::InvalidMetadata(_))
    ));
}

#[test]
fn reserializing_is_stable() {
    let mut deb = deb("stable", "1");
    deb.add("/usr/bin/b", 0o755, b"bbb".to_vec());
    deb.add("/usr/bin/a", 0o755, b"aa".to_vec());
    deb.add("/usr/lib/stable/x", 0o644, b"x".to_vec());

    let first = serialize(&deb, 42);
    let second = serialize(&deb, 42);
    assert_eq!(first, second);

    // Different timestamps only change the timestamps
    let later = ar_members(&serialize(&deb, 43));
    let first = ar_members(&first);
    let names = |m: &common::Member| {
        tar_entries(&m.data)
            .into_iter()
            .map(|e| (e.name, e.data))
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&first[1]), names(&later[1]));
    assert_eq!(names(&first[2]), names(&later[2]));
}

#[test]
fn write_to_uses_wall_clock() {
    let mut deb = deb("clock", "1");
    deb.add("/f", 0o644, b"f".to_vec());
    let mut out = Vec::new();
    deb.write_to(&mut out).unwrap();
    let members = ar_members(&out);
    assert_eq!(members.len(), 3);
    assert!(members[0].mtime > 1_600_000_000);
}

#[test]
fn empty_package() {
    let deb = deb("empty", "1");
    let members = ar_members(&serialize(&deb, 0));
    assert!(tar_entries(&member(&members, "data.tar.gz").data).is_empty());
    let control = tar_entries(&member(&members, "control.tar.gz").data);
    assert_eq!(entry(&control, "./md5sums").data, b"");
}

#[test]
fn long_paths() {
    let mut deb = deb("long", "1");
    let path = format!("/opt/{}/file", "d".repeat(120));
    deb.add(&path, 0o644, b"long".to_vec());
    let members = ar_members(&serialize(&deb, 0));
    let data = tar_entries(&member(&members, "data.tar.gz").data);
    let file = data.iter().find(|e| !e.is_dir).unwrap();
    assert_eq!(file.name, format!("./opt/{}/file", "d".repeat(120)));
    assert!(data.iter().any(|e| e.is_dir && e.name == format!("./opt/{}/", "d".repeat(120))));
    assert_eq!(file.data, b"long");
}
