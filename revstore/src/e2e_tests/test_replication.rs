//! Replicated histories: idempotent merges, divergent leaves, revs-diff.

use std::collections::BTreeMap;

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, create, leaf_ids, replicate, rev};
use crate::store::{ContentOptions, ForceInsertOutcome, parse_revision_history};
use crate::types::{DocumentEdit, Revision};

#[test]
fn test_force_insert_is_idempotent() {
    let store = TestStore::new();
    let history = ["4-d", "3-c", "2-b", "1-a"];

    let outcome = replicate(&store, "doc", &history);
    assert_eq!(outcome, ForceInsertOutcome::Inserted { sequence: 4 });
    let revisions_before = store.all_revisions("doc", false).unwrap();

    for _ in 0..3 {
        assert_eq!(
            replicate(&store, "doc", &history),
            ForceInsertOutcome::AlreadyPresent
        );
    }
    assert_eq!(store.all_revisions("doc", false).unwrap(), revisions_before);
    assert_eq!(store.latest_sequence().unwrap(), 4);

    // A longer history over the same prefix only adds the new tail.
    let outcome = replicate(&store, "doc", &["5-e", "4-d", "3-c", "2-b", "1-a"]);
    assert_eq!(outcome, ForceInsertOutcome::Inserted { sequence: 5 });
    assert_eq!(store.all_revisions("doc", false).unwrap().len(), 5);
    assert_eq!(leaf_ids(&store, "doc"), vec![rev("5-e")]);
}

#[test]
fn test_divergent_leaves_pick_a_deterministic_winner() {
    let one = TestStore::new();
    let two = TestStore::new();

    replicate(&one, "doc", &["2-aaa", "1-root"]);
    replicate(&one, "doc", &["2-bbb", "1-root"]);
    // Opposite arrival order on the other replica.
    replicate(&two, "doc", &["2-bbb", "1-root"]);
    replicate(&two, "doc", &["2-aaa", "1-root"]);

    for store in [&one, &two] {
        let winner = store.winning_revision("doc").unwrap();
        assert_eq!(winner.rev_id, rev("2-bbb"));
        assert!(winner.conflicted);
        assert_eq!(
            store.conflicting_revision_ids("doc").unwrap(),
            vec![rev("2-bbb"), rev("2-aaa")]
        );
    }

    let doc = one
        .get_document(
            "doc",
            None,
            &ContentOptions {
                include_conflicts: true,
                ..ContentOptions::default()
            },
        )
        .unwrap();
    assert_eq!(doc.body.unwrap()["_conflicts"], json!(["2-aaa"]));
}

#[test]
fn test_every_live_leaf_counts_towards_conflict() {
    let store = TestStore::new();
    replicate(&store, "doc", &["2-a", "1-root"]);
    replicate(&store, "doc", &["2-b", "1-root"]);
    replicate(&store, "doc", &["2-c", "1-root"]);

    // Delete the two highest branches; one conflict remains.
    for leaf in ["2-c", "2-b"] {
        store
            .put_revision(DocumentEdit::deletion("doc"), Some(&rev(leaf)), false)
            .unwrap();
    }
    let winner = store.winning_revision("doc").unwrap();
    assert_eq!(winner.rev_id, rev("2-a"));
    assert!(!winner.conflicted);

    replicate(&store, "doc", &["2-d", "1-root"]);
    let winner = store.winning_revision("doc").unwrap();
    assert_eq!(winner.rev_id, rev("2-d"));
    assert!(winner.conflicted);
}

#[test]
fn test_local_edit_resolves_conflict() {
    let store = TestStore::new();
    replicate(&store, "doc", &["2-a", "1-root"]);
    replicate(&store, "doc", &["2-b", "1-root"]);
    store
        .put_revision(DocumentEdit::deletion("doc"), Some(&rev("2-a")), false)
        .unwrap();

    let winner = store.winning_revision("doc").unwrap();
    assert_eq!(winner.rev_id, rev("2-b"));
    assert!(!winner.conflicted);
    assert_eq!(leaf_ids(&store, "doc").len(), 2);
}

#[test]
fn test_revs_diff_and_common_ancestor() {
    let store = TestStore::new();
    replicate(&store, "doc", &["3-c", "2-b", "1-a"]);
    create(&store, "plain", json!({}));

    let mut request = BTreeMap::new();
    request.insert("doc".to_string(), vec![rev("2-b"), rev("3-x"), rev("4-d")]);
    request.insert("missing".to_string(), vec![rev("1-z")]);
    request.insert(
        "plain".to_string(),
        store.all_revisions("plain", false).unwrap().into_iter().map(|r| r.rev_id).collect(),
    );
    let missing = store.find_missing_revisions(&request).unwrap();
    assert_eq!(missing.len(), 2);
    assert_eq!(missing["doc"], vec![rev("3-x"), rev("4-d")]);
    assert_eq!(missing["missing"], vec![rev("1-z")]);

    let ancestor = store
        .find_common_ancestor("doc", &rev("3-c"), &[rev("1-a"), rev("2-b"), rev("9-q")])
        .unwrap();
    assert_eq!(ancestor, Some(rev("2-b")));
    assert_eq!(
        store.find_common_ancestor("doc", &rev("3-c"), &[]).unwrap(),
        None
    );
}

#[test]
fn test_revisions_property_round_trips_into_force_insert() {
    let source = TestStore::new();
    replicate(&source, "doc", &["3-c", "2-b", "1-a"]);
    let doc = source
        .get_document(
            "doc",
            None,
            &ContentOptions {
                include_revs: true,
                ..ContentOptions::default()
            },
        )
        .unwrap();
    let body = doc.body.unwrap();
    assert_eq!(body["_revisions"], json!({"start": 3, "ids": ["c", "b", "a"]}));

    let history = parse_revision_history(&body["_revisions"]).unwrap();
    let target = TestStore::new();
    target
        .force_insert(
            Revision::new("doc", rev("3-c"), false).with_body(body),
            &history,
            None,
        )
        .unwrap();
    assert_eq!(target.all_revisions("doc", false).unwrap().len(), 3);
    assert_eq!(target.winning_revision("doc").unwrap().rev_id, rev("3-c"));
}
