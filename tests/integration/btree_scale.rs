//! Spec §8 scenario 3: insert 10,000 integers, delete every even one, and
//! confirm a full range scan yields exactly the 5,000 odd survivors in
//! ascending order. Insertion order is shuffled (rather than sequential) so
//! the exercised split/merge paths are not biased toward always-rightmost
//! insertion.

use quarry::index::BTree;
use quarry::types::{AttrType, CompositeKey, Rid, Value};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;

fn fresh_tree() -> BTree {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    drop(tmp);
    BTree::create(&path, AttrType::Int).unwrap()
}

fn key(v: i32) -> CompositeKey {
    CompositeKey::new(Value::Int(v), Rid::new(0, (v % 60000) as u16))
}

#[test]
fn ten_thousand_inserts_then_delete_evens_leaves_odds_in_order() {
    let mut tree = fresh_tree();
    let mut order: Vec<i32> = (0..10_000).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    order.shuffle(&mut rng);

    for v in &order {
        tree.insert(key(*v)).unwrap();
    }
    for v in (0..10_000).step_by(2) {
        tree.delete(&key(v)).unwrap();
    }

    let mut cursor = tree.range_scan(None, None);
    let mut seen = Vec::with_capacity(5_000);
    while let Some(k) = cursor.next(&mut tree).unwrap() {
        match k.value {
            Value::Int(v) => seen.push(v),
            _ => unreachable!(),
        }
    }
    let expected: Vec<i32> = (0..10_000).filter(|v| v % 2 == 1).collect();
    assert_eq!(seen, expected);
}

/// Spec §8: "Range scan with `[x, x]` inclusive returns all rids with value
/// `x`"; "Range scan with `(x, x)` exclusive returns empty."
#[test]
fn inclusive_point_range_returns_all_matches_exclusive_returns_none() {
    let mut tree = fresh_tree();
    for slot in 0..5u16 {
        tree.insert(CompositeKey::new(Value::Int(7), Rid::new(0, slot))).unwrap();
    }
    tree.insert(CompositeKey::new(Value::Int(8), Rid::new(0, 0))).unwrap();

    let incl_lower = CompositeKey::new(Value::Int(7), Rid::inclusive_bound());
    let incl_upper = CompositeKey::new(Value::Int(7), Rid::inclusive_bound());
    let mut cursor = tree.range_scan(Some(incl_lower), Some(incl_upper));
    let mut count = 0;
    while cursor.next(&mut tree).unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 5);

    let excl_lower = CompositeKey::new(Value::Int(7), Rid::exclusive_bound());
    let excl_upper = CompositeKey::new(Value::Int(7), Rid::exclusive_bound());
    let mut cursor = tree.range_scan(Some(excl_lower), Some(excl_upper));
    assert!(cursor.next(&mut tree).unwrap().is_none());
}

/// A deleted key is gone from a subsequent scan, and deleting it twice fails
/// the second time (spec §8: "delete(rid) removes it exactly once").
#[test]
fn delete_is_not_idempotent() {
    let mut tree = fresh_tree();
    tree.insert(key(1)).unwrap();
    tree.delete(&key(1)).unwrap();
    assert!(tree.delete(&key(1)).is_err());
}
