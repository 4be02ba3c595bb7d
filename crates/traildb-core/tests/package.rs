// crates/traildb-core/tests/package.rs
//
// The package form is a tar archive whose members are byte-identical to
// the directory form, with an index file at a fixed offset. Readers see
// the same logical store either way.

use std::collections::BTreeMap;

use traildb_core::{ConsOptions, Constructor, OutputFormat, TrailDb, Uuid};

const TOC_OFFSET: usize = 2560;

fn uuid(n: u8) -> Uuid {
    let mut u = [0u8; 16];
    u[15] = n;
    u
}

fn populate(cons: &mut Constructor) {
    for u in 1u8..=4 {
        for i in 0..30u64 {
            let v1 = format!("v{}", i % 7);
            let v2 = format!("w{}", i % 3);
            cons.add(
                &uuid(u),
                1000 + i * 10,
                &[v1.as_bytes(), v2.as_bytes()],
            )
            .unwrap();
        }
    }
}

/// Parse the package's index: name -> (offset, size).
fn parse_toc(bytes: &[u8]) -> BTreeMap<String, (usize, usize)> {
    let text = &bytes[TOC_OFFSET..];
    let nl = |s: &[u8]| s.iter().position(|&b| b == b'\n').unwrap();

    let mut at = 0;
    let first = nl(&text[at..]);
    assert_eq!(&text[at..at + first], b"TAR TOC FOR TDB VER 1");
    at += first + 1;

    let mut entries = BTreeMap::new();
    loop {
        let len = nl(&text[at..]);
        if len == 0 {
            break;
        }
        let line = std::str::from_utf8(&text[at..at + len]).unwrap();
        at += len + 1;
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap().to_string();
        let offset: usize = parts.next().unwrap().parse().unwrap();
        let size: usize = parts.next().unwrap().parse().unwrap();
        entries.insert(name, (offset, size));
    }
    entries
}

#[test]
fn package_members_match_directory_files() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("as_dir");
    let root_pkg = dir.path().join("as_pkg");

    let mut cons = Constructor::new(&root_dir, &["a", "b"]).unwrap();
    populate(&mut cons);
    cons.finalize().unwrap();

    let opts = ConsOptions {
        output_format: OutputFormat::Package,
        ..ConsOptions::default()
    };
    let mut cons = Constructor::with_options(&root_pkg, &["a", "b"], opts).unwrap();
    populate(&mut cons);
    cons.finalize().unwrap();

    let pkg_path = dir.path().join("as_pkg.tdb");
    assert!(pkg_path.is_file());
    // the source directory was consumed into the package
    assert!(!root_pkg.exists());

    let pkg = std::fs::read(&pkg_path).unwrap();
    let toc = parse_toc(&pkg);

    for name in [
        "version",
        "info",
        "fields",
        "lexicon.a",
        "lexicon.b",
        "trails.codebook",
        "trails.toc",
        "trails.data",
        "uuids",
    ] {
        let &(offset, size) = toc.get(name).unwrap_or_else(|| panic!("{name} missing"));
        let member = &pkg[offset..offset + size];
        let from_dir = std::fs::read(root_dir.join(name)).unwrap();
        assert_eq!(member, &from_dir[..], "member {name} differs");
    }

    // the toc entry itself points at the fixed offset
    assert_eq!(toc.get("tar.toc").unwrap().0, TOC_OFFSET);
}

#[test]
fn package_and_directory_read_identically() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("as_dir");
    let root_pkg = dir.path().join("as_pkg");

    let mut cons = Constructor::new(&root_dir, &["a", "b"]).unwrap();
    populate(&mut cons);
    cons.finalize().unwrap();

    let opts = ConsOptions {
        output_format: OutputFormat::Package,
        ..ConsOptions::default()
    };
    let mut cons = Constructor::with_options(&root_pkg, &["a", "b"], opts).unwrap();
    populate(&mut cons);
    cons.finalize().unwrap();

    let db_dir = TrailDb::open(&root_dir).unwrap();
    let db_pkg = TrailDb::open(dir.path().join("as_pkg.tdb")).unwrap();
    assert!(!db_dir.is_packaged());
    assert!(db_pkg.is_packaged());

    assert_eq!(db_dir.num_trails(), db_pkg.num_trails());
    assert_eq!(db_dir.num_events(), db_pkg.num_events());
    assert_eq!(db_dir.min_timestamp(), db_pkg.min_timestamp());
    assert_eq!(db_dir.max_timestamp(), db_pkg.max_timestamp());
    assert_eq!(db_dir.version(), db_pkg.version());

    let mut c1 = db_dir.cursor();
    let mut c2 = db_pkg.cursor();
    for trail_id in 0..db_dir.num_trails() {
        assert_eq!(db_dir.get_uuid(trail_id), db_pkg.get_uuid(trail_id));
        c1.get_trail(trail_id).unwrap();
        c2.get_trail(trail_id).unwrap();
        loop {
            match (c1.next(), c2.next()) {
                (None, None) => break,
                (Some(e1), Some(e2)) => {
                    assert_eq!(e1.timestamp, e2.timestamp);
                    assert_eq!(e1.items, e2.items);
                }
                _ => panic!("trail {trail_id} lengths differ"),
            }
        }
    }
}
