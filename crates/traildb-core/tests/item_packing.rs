// crates/traildb-core/tests/item_packing.rs
//
// Narrow and wide item layouts must round-trip through the accessors, and
// the narrow form must be used whenever the pair fits it.

use traildb_core::Item;

#[test]
fn narrow_roundtrip() {
    for field in [0u32, 1, 2, 63, 127] {
        for val in [0u64, 1, 255, 65535, (1 << 24) - 1] {
            let item = Item::new(field, val);
            assert!(item.is_narrow(), "field={field} val={val}");
            assert_eq!(item.field(), field);
            assert_eq!(item.val(), val);
        }
    }
}

#[test]
fn wide_roundtrip() {
    // large field forces wide
    for field in [128u32, 129, 1000, (1 << 14) - 2] {
        for val in [0u64, 1, (1 << 24) - 1, (1 << 40) - 2] {
            let item = Item::new(field, val);
            assert!(!item.is_narrow(), "field={field} val={val}");
            assert_eq!(item.field(), field);
            assert_eq!(item.val(), val);
        }
    }

    // large value forces wide even for small fields
    for field in [0u32, 1, 127] {
        for val in [1 << 24, (1 << 40) - 2, (1 << 47) - 2] {
            let item = Item::new(field, val);
            assert!(!item.is_narrow(), "field={field} val={val}");
            assert_eq!(item.field(), field);
            assert_eq!(item.val(), val);
        }
    }
}

#[test]
fn boundary_between_forms() {
    assert!(Item::new(127, (1 << 24) - 1).is_narrow());
    assert!(!Item::new(128, (1 << 24) - 1).is_narrow());
    assert!(!Item::new(127, 1 << 24).is_narrow());
}

#[test]
fn raw_roundtrip() {
    let item = Item::new(42, 12345);
    assert_eq!(Item::from_raw(item.raw()), item);
}

#[test]
fn null_items_carry_their_field() {
    for field in [1u32, 5, 200] {
        let item = Item::new(field, 0);
        assert_eq!(item.field(), field);
        assert_eq!(item.val(), 0);
    }
}
