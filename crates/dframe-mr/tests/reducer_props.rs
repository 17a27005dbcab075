use dframe_mr::{CompositeKey, EncodingData, EncodingTable, Wire};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// Integral values keep float sums exact, so any merge order must agree bit for bit.
fn arb_table() -> impl Strategy<Value = EncodingTable> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["a", "b", "c", "d", "test"]),
            -2i32..3,
            0u32..1_000,
            0u32..1_000,
        ),
        0..12,
    )
    .prop_map(|entries| {
        let mut table = EncodingTable::new();
        for (level, group, n, d) in entries {
            table.insert(
                CompositeKey::new(level, group),
                EncodingData::new(n as f64, d as f64),
            );
        }
        table
    })
}

proptest! {
    #[test]
    fn merge_is_associative_and_commutative(a in arb_table(), b in arb_table(), c in arb_table()) {
        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.clone().merge(b.clone().merge(c.clone()));
        let shuffled = b.clone().merge(a.clone().merge(c.clone()));
        prop_assert_eq!(&left, &right);
        prop_assert_eq!(&left, &shuffled);
    }

    #[test]
    fn merge_keeps_every_key_and_sums_shared_ones(a in arb_table(), b in arb_table()) {
        let merged = a.clone().merge(b.clone());
        for (key, data) in merged.iter() {
            let expected = match (a.get(key), b.get(key)) {
                (Some(x), Some(y)) => EncodingData::new(x.numerator + y.numerator, x.denominator + y.denominator),
                (Some(x), None) | (None, Some(x)) => *x,
                (None, None) => panic!("merged table invented key {key}"),
            };
            prop_assert_eq!(*data, expected);
        }
        for (key, _) in a.iter().chain(b.iter()) {
            prop_assert!(merged.get(key).is_some());
        }
    }

    #[test]
    fn empty_table_is_the_merge_identity(a in arb_table()) {
        prop_assert_eq!(&a.clone().merge(EncodingTable::new()), &a);
        prop_assert_eq!(&EncodingTable::new().merge(a.clone()), &a);
    }

    #[test]
    fn tables_roundtrip_through_the_wire(a in arb_table()) {
        let bytes = a.to_bytes().unwrap();
        let decoded = EncodingTable::from_bytes(&bytes).unwrap();
        prop_assert_eq!(&decoded, &a);
        // Sorted encoding: equal tables give equal bytes whatever their insertion order.
        prop_assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }
}

#[test]
fn put_all_replaces_instead_of_summing() {
    let mut a = EncodingTable::new();
    a.insert(CompositeKey::new("a", 0), EncodingData::new(1.0, 1.0));
    a.insert(CompositeKey::new("b", 0), EncodingData::new(2.0, 2.0));
    let mut b = EncodingTable::new();
    b.insert(CompositeKey::new("b", 0), EncodingData::new(7.0, 8.0));
    b.insert(CompositeKey::new("c", 1), EncodingData::new(0.0, 0.0));

    a.put_all(b);

    assert_eq!(a.len(), 3);
    assert_eq!(a.get(&CompositeKey::new("a", 0)), Some(&EncodingData::new(1.0, 1.0)));
    assert_eq!(a.get(&CompositeKey::new("b", 0)), Some(&EncodingData::new(7.0, 8.0)));
    assert_eq!(a.get(&CompositeKey::new("c", 1)), Some(&EncodingData::new(0.0, 0.0)));
}
