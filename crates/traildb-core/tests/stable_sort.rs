// crates/traildb-core/tests/stable_sort.rs
//
// Events with equal timestamps must come back in insertion order.

use traildb_core::{Constructor, TrailDb, Uuid};

fn add(cons: &mut Constructor, uuid: &Uuid, ts: u64, value: &str) {
    cons.add(uuid, ts, &[value.as_bytes()]).expect("add ok");
}

#[test]
fn insertion_order_within_equal_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");
    let uuid = [0u8; 16];

    let events: &[(u64, &str)] = &[
        (40, "i"),
        (3, "a"),
        (20, "e"),
        (41, "m"),
        (10, "c"),
        (40, "j"),
        (10, "d"),
        (20, "f"),
        (41, "n"),
        (41, "o"),
        (30, "g"),
        (5, "b"),
        (30, "h"),
        (40, "k"),
        (40, "l"),
    ];

    let mut cons = Constructor::new(&root, &["f1"]).unwrap();
    for &(ts, v) in events {
        add(&mut cons, &uuid, ts, v);
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    assert_eq!(db.lexicon_size(1), 16);
    assert_eq!(db.num_trails(), 1);

    // the letters were assigned so that a correct stable sort yields
    // (3,a), (5,b), (10,c), (10,d), ... with both columns increasing
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();
    let mut prev_ts = 0;
    let mut prev_val = 0u8;
    let mut n = 0;
    while let Some(ev) = cursor.next() {
        assert!(prev_ts <= ev.timestamp);
        prev_ts = ev.timestamp;
        let v = db.get_item_value(ev.items[0]).unwrap()[0];
        assert!(prev_val < v, "saw {} after {}", v as char, prev_val as char);
        prev_val = v;
        n += 1;
    }
    assert_eq!(n, events.len());
}

#[test]
fn tie_class_keeps_insertion_order_across_later_events() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");
    let uuid = [7u8; 16];

    // (5,A) (5,B) (5,C) (6,D) (5,E): the t=5 class keeps insertion order
    // with E last, and D moves past it
    let mut cons = Constructor::new(&root, &["f1"]).unwrap();
    for (ts, v) in [(5, "A"), (5, "B"), (5, "C"), (6, "D"), (5, "E")] {
        add(&mut cons, &uuid, ts, v);
    }
    cons.finalize().unwrap();

    let db = TrailDb::open(&root).unwrap();
    let mut cursor = db.cursor();
    cursor.get_trail(0).unwrap();

    let mut got = Vec::new();
    while let Some(ev) = cursor.next() {
        let v = db.get_item_value(ev.items[0]).unwrap().to_vec();
        got.push((ev.timestamp, String::from_utf8(v).unwrap()));
    }
    let want: Vec<(u64, String)> = [(5, "A"), (5, "B"), (5, "C"), (5, "E"), (6, "D")]
        .iter()
        .map(|&(t, s)| (t, s.to_string()))
        .collect();
    assert_eq!(got, want);
}
