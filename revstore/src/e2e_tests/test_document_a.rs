//! Create, edit and attempt a stale edit of document "a".

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create, leaf_ids, update};
use crate::store::{ContentOptions, StoreError};
use crate::types::DocumentEdit;

#[test]
fn test_document_a_lifecycle() {
    let store = TestStore::new();

    // Step 1: Create
    let first = create(&store, "a", json!({"x": 1}));
    assert_eq!(first.rev_id.generation(), 1);
    assert_eq!(first.rev_id.suffix().len(), 40);
    assert_eq!(first.sequence, Some(1));
    assert_eq!(leaf_ids(&store, "a"), vec![first.rev_id.clone()]);

    // Step 2: Edit with the correct parent
    let second = update(&store, &first, json!({"x": 2}));
    assert_eq!(second.rev_id.generation(), 2);
    assert_eq!(second.sequence, Some(2));
    assert_eq!(leaf_ids(&store, "a"), vec![second.rev_id.clone()]);

    let all = store.all_revisions("a", false).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].rev_id, first.rev_id);

    // Step 3: Concurrent edit from the stale parent
    let err = store
        .put_revision(
            DocumentEdit::new("a", body(json!({"x": 3}))),
            Some(&first.rev_id),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    let doc = store
        .get_document("a", None, &ContentOptions::default())
        .unwrap();
    assert_eq!(doc.rev_id, second.rev_id);
    assert_eq!(doc.body.unwrap()["x"], json!(2));
    assert_eq!(store.latest_sequence().unwrap(), 2);
}

#[test]
fn test_same_edit_yields_same_revision_id_everywhere() {
    let one = TestStore::new();
    let two = TestStore::new();

    let a1 = create(&one, "a", json!({"x": 1}));
    let b1 = create(&two, "a", json!({"x": 1}));
    assert_eq!(a1.rev_id, b1.rev_id);

    let a2 = update(&one, &a1, json!({"x": 2}));
    let b2 = update(&two, &b1, json!({"x": 2}));
    assert_eq!(a2.rev_id, b2.rev_id);

    let other = update(&two, &b2, json!({"x": 1}));
    assert_ne!(other.rev_id.suffix(), a1.rev_id.suffix());
}
