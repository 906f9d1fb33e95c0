//! Sequences are strictly increasing and never reused.

use std::collections::BTreeMap;

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create, replicate, update};
use crate::types::DocumentEdit;

#[test]
fn test_sequences_strictly_increase() {
    let store = TestStore::new();
    let mut last = store.latest_sequence().unwrap();
    assert_eq!(last, 0);

    for i in 0..10 {
        let doc_id = format!("doc-{i}");
        let first = create(&store, &doc_id, json!({"i": i}));
        let second = update(&store, &first, json!({"i": i + 1}));
        for seq in [first.sequence.unwrap(), second.sequence.unwrap()] {
            assert!(seq > last);
            last = seq;
        }

        // A rejected write does not consume a sequence.
        assert!(
            store
                .put_revision(DocumentEdit::new(doc_id.as_str(), body(json!({}))), None, false)
                .is_err()
        );
    }
    assert_eq!(store.latest_sequence().unwrap(), last);
}

#[test]
fn test_placeholders_take_sequences_in_order() {
    let store = TestStore::new();
    replicate(&store, "doc", &["3-c", "2-b", "1-a"]);
    let seqs: Vec<u64> = store
        .all_revisions("doc", false)
        .unwrap()
        .iter()
        .map(|rev| rev.sequence.unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 2, 1]);
}

#[test]
fn test_purged_sequences_are_not_reused() {
    let store = TestStore::new();
    create(&store, "gone", json!({}));
    create(&store, "kept", json!({}));
    let before = store.latest_sequence().unwrap();

    let mut request = BTreeMap::new();
    request.insert("gone".to_string(), vec!["*".to_string()]);
    store.purge_revisions(&request).unwrap();
    assert_eq!(store.latest_sequence().unwrap(), before);

    let store = store.reopen();
    assert_eq!(store.latest_sequence().unwrap(), before);
    let next = create(&store, "new", json!({}));
    assert_eq!(next.sequence, Some(before + 1));
}
