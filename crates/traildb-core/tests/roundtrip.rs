// crates/traildb-core/tests/roundtrip.rs

use traildb_core::{ConsOptions, Constructor, TrailDb, TdbError, Uuid};

fn uuid(n: u8) -> Uuid {
    let mut u = [0u8; 16];
    u[15] = n;
    u
}

fn add(cons: &mut Constructor, uuid: &Uuid, ts: u64, values: &[&str]) {
    let bytes: Vec<&[u8]> = values.iter().map(|v| v.as_bytes()).collect();
    cons.add(uuid, ts, &bytes).expect("add ok");
}

fn lcg_next(x: &mut u64) -> u64 {
    // deterministic, not crypto
    *x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
    *x
}

#[test]
fn single_trail_two_events() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    add(&mut cons, &uuid(1), 100, &["x"]);
    add(&mut cons, &uuid(1), 200, &["y"]);
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_trails(), 1);
    assert_eq!(db.num_events(), 2);
    assert_eq!(db.min_timestamp(), 100);
    assert_eq!(db.max_timestamp(), 200);
    assert_eq!(db.num_fields(), 2);
    assert_eq!(db.get_field("time"), Some(0));
    assert_eq!(db.get_field("a"), Some(1));

    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();

    let ev = cursor.next().unwrap();
    assert_eq!(ev.timestamp, 100);
    assert_eq!(ev.items.len(), 1);
    assert_eq!(db.get_item_value(ev.items[0]), Some(b"x".as_slice()));

    let ev = cursor.next().unwrap();
    assert_eq!(ev.timestamp, 200);
    assert_eq!(db.get_item_value(ev.items[0]), Some(b"y".as_slice()));
    assert!(cursor.next().is_none());
}

#[test]
fn what_you_write_you_get_back() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    // arbitrary bytes, NULs included; the first value is empty (NULL)
    let values: Vec<Vec<u8>> = (0u8..50)
        .map(|i| (0..i).map(|j| j.wrapping_mul(7)).collect())
        .collect();

    let mut cons = Constructor::new(&root, &["f"]).unwrap();
    for (i, v) in values.iter().enumerate() {
        cons.add(&uuid(1), i as u64, &[v.as_slice()]).unwrap();
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    // values[0] is empty, so it interned as NULL; the rest got dense ids
    assert_eq!(db.lexicon_size(1), values.len() as u64);

    for (i, v) in values.iter().enumerate().skip(1) {
        assert_eq!(
            db.get_value(1, i as u64),
            Some(v.as_slice()),
            "value id {i}"
        );
    }
    assert_eq!(db.get_value(1, 0), Some(b"".as_slice()));
    assert_eq!(db.get_value(1, values.len() as u64), None);
    assert_eq!(db.get_value(0, 1), None);
    assert_eq!(db.get_value(2, 1), None);

    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    for (i, v) in values.iter().enumerate() {
        let ev = cursor.next().unwrap();
        assert_eq!(ev.timestamp, i as u64);
        assert_eq!(db.get_item_value(ev.items[0]), Some(v.as_slice()));
    }
    assert!(cursor.next().is_none());
}

#[test]
fn one_event_trail_decodes_to_one_event() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let mut cons = Constructor::new(&root, &["a", "b"]).unwrap();
    add(&mut cons, &uuid(9), 42, &["only", "one"]);
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    assert_eq!(cursor.get_trail_length(), 1);

    cursor.get_trail(0).unwrap();
    let ev = cursor.next().unwrap();
    assert_eq!(ev.timestamp, 42);
    assert_eq!(ev.items.len(), 2);
    assert!(cursor.next().is_none());
}

#[test]
fn empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let cons = Constructor::new(&root, &[]).unwrap();
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_trails(), 0);
    assert_eq!(db.num_events(), 0);
    assert_eq!(db.num_fields(), 1);
    assert_eq!(db.min_timestamp(), 0);
    assert_eq!(db.max_timestamp(), 0);
    assert!(db.get_uuid(0).is_none());

    let mut cursor = db.cursor();
    assert!(matches!(
        cursor.get_trail(0),
        Err(TdbError::InvalidTrailId(0))
    ));
}

#[test]
fn empty_store_with_fields() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let cons = Constructor::new(&root, &["a", "b"]).unwrap();
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_trails(), 0);
    assert_eq!(db.num_fields(), 3);
    assert_eq!(db.lexicon_size(1), 1); // just the NULL value
}

#[test]
fn zero_field_events() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let mut cons = Constructor::new(&root, &[]).unwrap();
    for ts in [5u64, 6, 7] {
        cons.add(&uuid(3), ts, &[]).unwrap();
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_events(), 3);
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    for ts in [5u64, 6, 7] {
        let ev = cursor.next().unwrap();
        assert_eq!(ev.timestamp, ts);
        assert!(ev.items.is_empty());
    }
    assert!(cursor.next().is_none());
}

#[test]
fn value_size_limits() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    let max = vec![b'v'; 1024];
    cons.add(&uuid(1), 1, &[max.as_slice()]).unwrap();

    let too_long = vec![b'v'; 1025];
    assert!(matches!(
        cons.add(&uuid(1), 2, &[too_long.as_slice()]),
        Err(TdbError::ValueTooLong(1025))
    ));
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_events(), 1);
    assert_eq!(db.get_value(1, 1), Some(max.as_slice()));
}

#[test]
fn timedelta_boundaries() {
    const MAX_TIMEDELTA: u64 = (1 << 47) - 1;

    // delta of MAX_TIMEDELTA - 1 is the largest that still encodes
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ok");
    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    add(&mut cons, &uuid(1), 0, &["x"]);
    add(&mut cons, &uuid(1), MAX_TIMEDELTA - 1, &["y"]);
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.max_timestamp(), MAX_TIMEDELTA - 1);
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    assert_eq!(cursor.next().unwrap().timestamp, 0);
    assert_eq!(cursor.next().unwrap().timestamp, MAX_TIMEDELTA - 1);

    // a delta of exactly MAX_TIMEDELTA fails the whole finalize
    let root = dir.path().join("bad");
    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    add(&mut cons, &uuid(1), 0, &["x"]);
    add(&mut cons, &uuid(1), MAX_TIMEDELTA, &["y"]);
    assert!(matches!(
        cons.finalize(),
        Err(TdbError::TimestampTooLarge)
    ));

    // min_timestamp itself must stay below the delta ceiling
    let root = dir.path().join("minbad");
    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    add(&mut cons, &uuid(1), MAX_TIMEDELTA, &["x"]);
    assert!(matches!(
        cons.finalize(),
        Err(TdbError::TimestampTooLarge)
    ));
}

#[test]
fn small_cursor_buffer_refills() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let mut cons = Constructor::new(&root, &["a"]).unwrap();
    for i in 0..57u64 {
        add(&mut cons, &uuid(1), i, &[if i % 2 == 0 { "even" } else { "odd" }]);
    }
    cons.finalize().unwrap();

    let mut db = TrailDb::open(&root).unwrap();
    db.set_cursor_event_buffer_size(2).unwrap();
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    for i in 0..57u64 {
        let ev = cursor.next().unwrap();
        assert_eq!(ev.timestamp, i);
        let expect: &[u8] = if i % 2 == 0 { b"even" } else { b"odd" };
        assert_eq!(db.get_item_value(ev.items[0]), Some(expect));
    }
    assert!(cursor.next().is_none());
}

#[test]
fn randomized_roundtrip_multiple_trails() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let alphabet = ["red", "green", "blue", "cyan"];
    let mut seed = 0x00c0_ffee_u64;

    // expected[uuid] = insertion-ordered (ts, a, b)
    let mut expected: Vec<Vec<(u64, usize, usize)>> = vec![Vec::new(); 3];
    let mut cons = Constructor::new(&root, &["a", "b"]).unwrap();
    for _ in 0..600 {
        let u = (lcg_next(&mut seed) % 3) as usize;
        let ts = lcg_next(&mut seed) % 50; // plenty of duplicate timestamps
        let a = (lcg_next(&mut seed) % 4) as usize;
        let b = (lcg_next(&mut seed) % 4) as usize;
        add(&mut cons, &uuid(u as u8 + 1), ts, &[alphabet[a], alphabet[b]]);
        expected[u].push((ts, a, b));
    }
    cons.finalize().unwrap();

    for trail in expected.iter_mut() {
        trail.sort_by_key(|e| e.0); // stable, like the store
    }

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_trails(), 3);
    assert_eq!(db.num_events(), 600);

    let mut cursor = db.cursor();
    for (trail_id, trail) in expected.iter().enumerate() {
        cursor.get_trail(trail_id as u64).unwrap();
        for (i, &(ts, a, b)) in trail.iter().enumerate() {
            let ev = cursor.next().unwrap_or_else(|| {
                panic!("trail {trail_id} ended early at event {i}")
            });
            assert_eq!(ev.timestamp, ts, "trail {trail_id} event {i}");
            assert_eq!(ev.items.len(), 2);
            assert_eq!(
                db.get_item_value(ev.items[0]),
                Some(alphabet[a].as_bytes()),
                "trail {trail_id} event {i} field a"
            );
            assert_eq!(
                db.get_item_value(ev.items[1]),
                Some(alphabet[b].as_bytes()),
                "trail {trail_id} event {i} field b"
            );
        }
        assert!(cursor.next().is_none(), "trail {trail_id} too long");
    }
}

#[test]
fn spilled_arenas_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let opts = ConsOptions {
        spill_threshold: 0, // every record goes through the temp file
        ..ConsOptions::default()
    };
    let mut cons = Constructor::with_options(&root, &["a"], opts).unwrap();
    for i in 0..100u64 {
        add(&mut cons, &uuid((i % 5) as u8 + 1), i, &["v"]);
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.num_trails(), 5);
    assert_eq!(db.num_events(), 100);

    let mut cursor = db.cursor();
    let mut total = 0;
    for trail_id in 0..db.num_trails() {
        cursor.get_trail(trail_id).unwrap();
        total += cursor.get_trail_length();
    }
    assert_eq!(total, 100);
}

#[test]
fn no_bigrams_option_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");

    let opts = ConsOptions {
        no_bigrams: true,
        ..ConsOptions::default()
    };
    let mut cons = Constructor::with_options(&root, &["a", "b"], opts).unwrap();
    for i in 0..40u64 {
        add(&mut cons, &uuid(1), i, &["same", "pair"]);
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    assert_eq!(cursor.get_trail_length(), 40);
}
