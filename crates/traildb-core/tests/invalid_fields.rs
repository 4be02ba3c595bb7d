// crates/traildb-core/tests/invalid_fields.rs

use traildb_core::{Constructor, TdbError};

#[test]
fn rejects_bad_field_names() {
    let dir = tempfile::tempdir().unwrap();

    for bad in ["", "time", "has space", "has/slash", "tab\tbed", "nön-ascii"] {
        let err = Constructor::new(dir.path().join("t"), &[bad]).unwrap_err();
        assert!(
            matches!(err, TdbError::InvalidFieldname(_)),
            "expected InvalidFieldname for {bad:?}, got {err:?}"
        );
    }

    let too_long = "f".repeat(513);
    assert!(matches!(
        Constructor::new(dir.path().join("t"), &[too_long.as_str()]),
        Err(TdbError::InvalidFieldname(_))
    ));

    // 512 characters is still fine
    let max_len = "f".repeat(512);
    Constructor::new(dir.path().join("ok"), &[max_len.as_str()]).unwrap();
}

#[test]
fn rejects_duplicate_field_names() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Constructor::new(dir.path().join("t"), &["a", "b", "a"]),
        Err(TdbError::DuplicateFields(_))
    ));
}

#[test]
fn accepts_the_allowed_charset() {
    let dir = tempfile::tempdir().unwrap();
    let cons = Constructor::new(
        dir.path().join("t"),
        &["simple", "with_underscore", "with-dash", "with%percent", "MiXed09"],
    )
    .unwrap();
    cons.finalize().unwrap();
}

#[test]
fn rejects_wrong_value_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut cons = Constructor::new(dir.path().join("t"), &["a", "b"]).unwrap();
    let uuid = [0u8; 16];
    assert!(matches!(
        cons.add(&uuid, 1, &[b"only-one".as_slice()]),
        Err(TdbError::FieldCountMismatch)
    ));
}
