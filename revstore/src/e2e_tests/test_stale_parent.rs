//! Writes against stale or unknown parents leave the tree untouched.

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create, leaf_ids, rev, update};
use crate::store::StoreError;
use crate::types::DocumentEdit;

#[test]
fn test_stale_parent_conflicts_without_side_effects() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"v": 1}));
    let second = update(&store, &first, json!({"v": 2}));
    let leaves_before = leaf_ids(&store, "doc");
    let seq_before = store.latest_sequence().unwrap();

    for attempt in 0..3 {
        let err = store
            .put_revision(
                DocumentEdit::new("doc", body(json!({"attempt": attempt}))),
                Some(&first.rev_id),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    assert_eq!(leaf_ids(&store, "doc"), leaves_before);
    assert_eq!(store.latest_sequence().unwrap(), seq_before);
    assert_eq!(store.winning_revision("doc").unwrap().rev_id, second.rev_id);
}

#[test]
fn test_create_over_existing_document_conflicts() {
    let store = TestStore::new();
    create(&store, "doc", json!({}));
    let err = store
        .put_revision(DocumentEdit::new("doc", body(json!({}))), None, false)
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(store.latest_sequence().unwrap(), 1);
}

#[test]
fn test_unknown_parent_is_not_found() {
    let store = TestStore::new();
    create(&store, "doc", json!({}));
    let err = store
        .put_revision(
            DocumentEdit::new("doc", body(json!({}))),
            Some(&rev("7-deadbeef")),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert_eq!(store.latest_sequence().unwrap(), 1);
}

#[test]
fn test_allow_conflict_branches_from_stale_parent() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"v": 1}));
    update(&store, &first, json!({"v": 2}));

    let branch = store
        .put_revision(
            DocumentEdit::new("doc", body(json!({"v": "branch"}))),
            Some(&first.rev_id),
            true,
        )
        .unwrap();
    assert_eq!(branch.rev_id.generation(), 2);
    assert_eq!(leaf_ids(&store, "doc").len(), 2);
    assert!(store.winning_revision("doc").unwrap().conflicted);
}

#[test]
fn test_delete_then_recreate() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"v": 1}));
    let tombstone = store
        .put_revision(DocumentEdit::deletion("doc"), Some(&first.rev_id), false)
        .unwrap();
    assert!(tombstone.deleted);
    assert!(store.winning_revision("doc").unwrap().deleted);

    let err = store
        .put_revision(DocumentEdit::deletion("doc"), None, false)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let recreated = create(&store, "doc", json!({"v": "again"}));
    assert_eq!(recreated.rev_id.generation(), 3);
    assert_eq!(leaf_ids(&store, "doc"), vec![recreated.rev_id]);
}
