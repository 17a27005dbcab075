use dframe_mr::{CompositeKey, ScratchKey, Wire, NO_GROUP};
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

fn std_hash(key: &CompositeKey) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

proptest! {
    #[test]
    fn equal_fields_give_equal_hashes(level in "[a-z]{0,8}", group in any::<i32>()) {
        let a = CompositeKey::new(level.as_str(), group);
        let b = CompositeKey::from_levels([level.as_str()], group);
        let mut scratch = ScratchKey::new();
        scratch.update(level.as_str(), group);

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.stable_hash(), b.stable_hash());
        prop_assert_eq!(std_hash(&a), std_hash(&b));
        prop_assert_eq!(scratch.as_key(), &a);
        prop_assert_eq!(scratch.stable_hash(), a.stable_hash());
    }

    #[test]
    fn updating_a_scratch_key_changes_its_identity(
        level in "[a-z]{1,8}",
        group in any::<i32>(),
        other_level in "[a-z]{1,8}",
        other_group in any::<i32>(),
    ) {
        prop_assume!(level != other_level || group != other_group);
        let original = CompositeKey::new(level.as_str(), group);
        let mut scratch = ScratchKey::new();
        scratch.update(level.as_str(), group);
        let stored = scratch.to_key();

        scratch.update(other_level.as_str(), other_group);

        prop_assert_ne!(scratch.as_key(), &original);
        prop_assert_ne!(scratch.stable_hash(), original.stable_hash());
        // Copies taken before the update keep the old identity.
        prop_assert_eq!(&stored, &original);
    }

    #[test]
    fn keys_roundtrip_through_the_wire(
        levels in prop::collection::vec("\\PC{0,6}", 0..4),
        group in any::<i32>(),
    ) {
        let key = CompositeKey::from_levels(levels.iter().map(String::as_str), group);
        prop_assert_eq!(CompositeKey::from_bytes(&key.to_bytes().unwrap()).unwrap(), key);
    }
}

#[test]
fn scratch_key_probes_a_set_without_being_stored() {
    let mut set = HashSet::new();
    set.insert(CompositeKey::new("a", 1));

    let mut scratch = ScratchKey::new();
    scratch.update("a", 1);
    assert!(set.contains(scratch.as_key()));

    scratch.update("test", NO_GROUP);
    assert!(!set.contains(scratch.as_key()));
    assert!(set.contains(&CompositeKey::new("a", 1)));
}
