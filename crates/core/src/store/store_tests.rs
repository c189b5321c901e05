use super::*;
use crate::id::SequentialIdGen;
use crate::query::CompareOp;
use crate::tags::RESERVED_ID_KEY;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn store() -> AssociatedStore<u32, SequentialIdGen> {
    AssociatedStore::with_id_gen(SequentialIdGen::new("e"))
}

fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs.iter().copied().collect()
}

#[test]
fn create_then_find_runs_one_callback_each() {
    let store = store();
    let key = tags(&[("a", "1")]);

    let (id, lookup) = store.create_or_find(&key, |_| 1, |_| unreachable!());
    assert_eq!(id, AssociatedId::from("e-1"));
    assert!(lookup.is_created());

    let (again, lookup) = store.create_or_find(
        &key,
        |_| unreachable!(),
        |value| {
            *value += 1;
            *value
        },
    );
    assert_eq!(again, id);
    assert_eq!(lookup, Lookup::Found(2));
    assert_eq!(store.len(), 1);
}

#[test]
fn on_create_sees_minted_id() {
    let store: AssociatedStore<String, _> = AssociatedStore::with_id_gen(SequentialIdGen::new("x"));
    let (id, _) = store.create_or_find(&tags(&[("k", "v")]), |id| id.to_string(), |_| ());
    let seen = store.find_by_associated_id(&id, |_, value| value.clone());
    assert_eq!(seen.as_deref(), Some("x-1"));
}

#[test]
fn tag_order_does_not_create_duplicates() {
    let store = store();
    let (a, _) = store.create_or_find(&tags(&[("a", "1"), ("b", "2")]), |_| 0, |_| ());
    let (b, lookup) = store.create_or_find(&tags(&[("b", "2"), ("a", "1")]), |_| 0, |_| ());
    assert_eq!(a, b);
    assert!(!lookup.is_created());
}

#[test]
fn find_by_id_passes_caller_tags() {
    let store = store();
    let key = tags(&[("a", "1")]);
    let (id, _) = store.create_or_find(&key, |_| 7, |_| ());

    let found = store.find_by_associated_id(&id, |tags, value| (tags.clone(), *value));
    assert_eq!(found, Some((key, 7)));
}

#[test]
fn find_by_unknown_id_is_none() {
    let store = store();
    let result = store.find_by_associated_id(&AssociatedId::from("nope"), |_, _| ());
    assert!(result.is_none());
}

#[test]
fn delete_respects_predicate() {
    let store = store();
    let key = tags(&[("a", "1")]);
    let (id, _) = store.create_or_find(&key, |_| 2, |_| ());

    let removed = store.delete(&key, |seen, value| {
        assert_eq!(seen, &id);
        *value -= 1;
        *value == 0
    });
    assert!(!removed);
    assert_eq!(store.len(), 1);

    let removed = store.delete(&key, |_, value| {
        *value -= 1;
        *value == 0
    });
    assert!(removed);
    assert!(store.is_empty());
    assert!(store.find_by_associated_id(&id, |_, _| ()).is_none());
}

#[test]
fn delete_missing_entry_is_false() {
    let store = store();
    assert!(!store.delete(&tags(&[("a", "1")]), |_, _| true));
}

#[test]
fn delete_by_id_clears_both_indexes() {
    let store = store();
    let key = tags(&[("a", "1")]);
    let (id, _) = store.create_or_find(&key, |_| 0, |_| ());

    assert_eq!(store.delete_by_associated_id(&id, |_, _| true), Some(true));
    assert_eq!(store.delete_by_associated_id(&id, |_, _| true), None);

    // A fresh entry for the same tags gets a fresh id
    let (fresh, lookup) = store.create_or_find(&key, |_| 0, |_| ());
    assert!(lookup.is_created());
    assert_ne!(fresh, id);
}

#[test]
fn stale_id_cannot_delete_recreated_entry() {
    let store = store();
    let key = tags(&[("a", "1")]);
    let (old, _) = store.create_or_find(&key, |_| 0, |_| ());
    store.delete_by_associated_id(&old, |_, _| true);
    store.create_or_find(&key, |_| 0, |_| ());

    assert_eq!(store.delete_by_associated_id(&old, |_, _| true), None);
    assert_eq!(store.len(), 1);
}

#[test]
fn query_filters_and_stops_early() {
    let store = store();
    store.create_or_find(&tags(&[("team", "a"), ("n", "1")]), |_| 1, |_| ());
    store.create_or_find(&tags(&[("team", "a"), ("n", "2")]), |_| 2, |_| ());
    store.create_or_find(&tags(&[("team", "b")]), |_| 3, |_| ());

    let mut seen = Vec::new();
    let team_a = Selection::new().compare("team", CompareOp::Eq, "a");
    store.query(&team_a, |_, tags, value| {
        assert!(!tags.contains_key(RESERVED_ID_KEY));
        seen.push(*value);
        true
    });
    seen.sort();
    assert_eq!(seen, vec![1, 2]);

    let mut visits = 0;
    store.query(&Selection::all(), |_, _, _| {
        visits += 1;
        false
    });
    assert_eq!(visits, 1);
}

#[test]
fn query_can_select_by_reserved_id() {
    let store = store();
    store.create_or_find(&tags(&[("a", "1")]), |_| 1, |_| ());
    let (id, _) = store.create_or_find(&tags(&[("a", "2")]), |_| 2, |_| ());

    let mut hits = Vec::new();
    let by_id = Selection::new().compare(RESERVED_ID_KEY, CompareOp::Eq, id.as_str());
    store.query(&by_id, |found, _, value| {
        hits.push((found.clone(), *value));
        true
    });
    assert_eq!(hits, vec![(id, 2)]);
}

#[test]
fn panicking_on_create_leaves_no_entry_behind() {
    let store = store();
    let key = tags(&[("a", "1")]);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        store.create_or_find(&key, |_| panic!("boom"), |_| ());
    }));
    assert!(result.is_err());

    // The half-built slot is cleared and a fresh entry is created
    let (_, lookup) = store.create_or_find(&key, |_| 5, |_| ());
    assert!(lookup.is_created());
    assert_eq!(store.len(), 1);
}

#[derive(Clone)]
struct StuckIdGen;

impl IdGen for StuckIdGen {
    fn next(&self) -> AssociatedId {
        AssociatedId::from("same")
    }
}

#[test]
#[should_panic(expected = "duplicate associated id")]
fn duplicate_id_is_an_invariant_violation() {
    let store: AssociatedStore<u32, StuckIdGen> = AssociatedStore::with_id_gen(StuckIdGen);
    store.create_or_find(&tags(&[("a", "1")]), |_| 0, |_| ());
    store.create_or_find(&tags(&[("a", "2")]), |_| 0, |_| ());
}

#[test]
fn concurrent_create_or_find_creates_once() {
    let store = Arc::new(store());
    let key = tags(&[("shared", "yes")]);
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            let created = Arc::clone(&created);
            thread::spawn(move || {
                for _ in 0..100 {
                    store.create_or_find(
                        &key,
                        |_| {
                            created.fetch_add(1, Ordering::SeqCst);
                            1
                        },
                        |count| *count += 1,
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 1);
    let total = store.find_by_associated_id(&AssociatedId::from("e-1"), |_, count| *count);
    assert_eq!(total, Some(1600));
}

#[test]
fn concurrent_increment_and_decrement_balance_out() {
    let store = Arc::new(store());
    let key = tags(&[("churn", "1")]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    store.create_or_find(&key, |_| 1, |count| *count += 1);
                    store.delete(&key, |_, count| {
                        *count -= 1;
                        *count == 0
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(store.is_empty());
}

#[test]
fn debug_lists_entries() {
    let store = store();
    store.create_or_find(&tags(&[("a", "1")]), |_| 0, |_| ());
    let rendered = format!("{:?}", store);
    assert!(rendered.contains("e-1 => a=1"), "{}", rendered);
}
