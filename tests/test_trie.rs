use std::collections::BTreeMap;
use std::ops::ControlFlow;

use proptest::prelude::*;
use switchyard::router::PrefixTrie;

#[derive(Debug, Clone)]
enum Op {
    Insert(String, u32),
    Remove(String),
}

fn op() -> impl Strategy<Value = Op> {
    // A tiny alphabet so keys share prefixes and force splits and merges.
    let key = "[/ab:]{1,6}";
    prop_oneof![
        (key, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        key.prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// The trie agrees with an ordered map after any edit sequence.
    #[test]
    fn test_matches_reference_map(ops in prop::collection::vec(op(), 0..80)) {
        let mut trie = PrefixTrie::new();
        let mut model = BTreeMap::new();
        let mut touched = Vec::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    prop_assert_eq!(trie.insert(&key, value), model.insert(key.clone(), value));
                    touched.push(key);
                }
                Op::Remove(key) => {
                    prop_assert_eq!(trie.remove(&key), model.remove(&key));
                    touched.push(key);
                }
            }
        }

        for key in &touched {
            prop_assert_eq!(trie.get(key), model.get(key));
        }
        prop_assert_eq!(trie.len(), model.len());

        // Pre-order over byte-sorted children is lexicographic key order.
        let expected: Vec<String> = model.keys().cloned().collect();
        prop_assert_eq!(trie.keys(), expected);
    }

    /// `longest_prefix` returns the longest stored key that prefixes the query.
    #[test]
    fn test_longest_prefix_agrees_with_scan(
        keys in prop::collection::vec("[/ab]{1,5}", 0..20),
        query in "[/ab]{0,8}",
    ) {
        let mut trie = PrefixTrie::new();
        for key in &keys {
            trie.insert(key, key.clone());
        }

        let expected = keys
            .iter()
            .filter(|k| query.starts_with(k.as_str()))
            .max_by_key(|k| k.len());

        match (trie.longest_prefix(&query), expected) {
            (Some((prefix, value)), Some(best)) => {
                prop_assert_eq!(prefix, best.as_str());
                prop_assert_eq!(value, best);
            }
            (None, None) => {}
            (got, want) => prop_assert!(false, "got {:?}, want {:?}", got, want),
        }
    }
}

#[test]
fn test_empty_key_is_rejected() {
    let mut trie = PrefixTrie::new();

    assert_eq!(trie.insert("", 1), None);
    assert!(trie.is_empty());
    assert_eq!(trie.get(""), None);
    assert_eq!(trie.remove(""), None);
}

#[test]
fn test_get_of_split_point_is_a_miss() {
    let mut trie = PrefixTrie::new();
    trie.insert("/static/css", 1);
    trie.insert("/static/js", 2);

    assert_eq!(trie.get("/static/"), None);
    assert_eq!(trie.get("/static"), None);
    assert!(!trie.contains_key("/static/"));
    assert_eq!(trie.get("/static/js"), Some(&2));
}

#[test]
fn test_insert_replaces_and_returns_previous() {
    let mut trie = PrefixTrie::new();

    assert_eq!(trie.insert("/health", "v1"), None);
    assert_eq!(trie.insert("/health", "v2"), Some("v1"));
    assert_eq!(trie.len(), 1);
    assert_eq!(trie.get("/health"), Some(&"v2"));
}

#[test]
fn test_get_mut_updates_in_place() {
    let mut trie = PrefixTrie::new();
    trie.insert("/counter", 0);

    *trie.get_mut("/counter").unwrap() += 5;

    assert_eq!(trie.get("/counter"), Some(&5));
    assert!(trie.get_mut("/count").is_none());
}

#[test]
fn test_walk_stops_when_visitor_breaks() {
    let mut trie = PrefixTrie::new();
    for key in ["/a", "/b", "/c", "/d"] {
        trie.insert(key, ());
    }

    let mut seen = Vec::new();
    trie.walk(|key, _| {
        seen.push(key.to_string());
        if seen.len() == 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    assert_eq!(seen, vec!["/a", "/b"]);
}

#[test]
fn test_walk_visits_parent_before_children() {
    let mut trie = PrefixTrie::new();
    trie.insert("/api/v1", 2);
    trie.insert("/api", 1);
    trie.insert("/api/v1/users", 3);

    assert_eq!(trie.keys(), vec!["/api", "/api/v1", "/api/v1/users"]);
}

#[test]
fn test_longest_prefix_skips_valueless_ancestors() {
    let mut trie = PrefixTrie::new();
    trie.insert("/api", 1);
    trie.insert("/api/users", 2);
    trie.insert("/api/uploads", 3);

    assert_eq!(trie.longest_prefix("/api/users/7"), Some(("/api/users", &2)));
    // "/api/u" exists only as a split point.
    assert_eq!(trie.longest_prefix("/api/u"), Some(("/api", &1)));
    assert_eq!(trie.longest_prefix("/other"), None);
}
