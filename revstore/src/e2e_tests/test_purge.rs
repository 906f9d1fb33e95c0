//! Purge removes revisions without leaving tombstones.

use std::collections::BTreeMap;

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, create, leaf_ids, replicate, rev, update};
use crate::store::{ChangesOptions, ContentOptions, StoreError};

fn purge_request(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(doc_id, revs)| {
            (
                (*doc_id).to_string(),
                revs.iter().map(|rev| (*rev).to_string()).collect(),
            )
        })
        .collect()
}

#[test]
fn test_purge_everything_then_not_found() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"v": 1}));
    let second = update(&store, &first, json!({"v": 2}));

    let purged = store
        .purge_revisions(&purge_request(&[("doc", &["*"])]))
        .unwrap();
    assert_eq!(purged["doc"], vec![second.rev_id, first.rev_id]);

    assert!(matches!(
        store.get_document("doc", None, &ContentOptions::default()),
        Err(StoreError::NotFound(_))
    ));
    assert!(leaf_ids(&store, "doc").is_empty());
    assert_eq!(store.document_count().unwrap(), 0);

    let again = store
        .purge_revisions(&purge_request(&[("doc", &["*"])]))
        .unwrap();
    assert!(again["doc"].is_empty());
}

#[test]
fn test_purged_revisions_leave_the_change_feed() {
    let store = TestStore::new();
    create(&store, "gone", json!({}));
    create(&store, "kept", json!({}));

    store
        .purge_revisions(&purge_request(&[("gone", &["*"])]))
        .unwrap();
    let changes = store
        .changes_since(0, &ChangesOptions::default(), None)
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].doc_id, "kept");
}

#[test]
fn test_purging_a_losing_branch_resolves_the_conflict() {
    let store = TestStore::new();
    replicate(&store, "doc", &["3-a", "2-a", "1-root"]);
    replicate(&store, "doc", &["3-b", "2-b", "1-root"]);
    assert!(store.winning_revision("doc").unwrap().conflicted);

    let purged = store
        .purge_revisions(&purge_request(&[("doc", &["3-a"]), ("other", &["1-x"])]))
        .unwrap();
    assert_eq!(purged["doc"], vec![rev("3-a"), rev("2-a")]);
    assert!(purged["other"].is_empty());

    let winner = store.winning_revision("doc").unwrap();
    assert_eq!(winner.rev_id, rev("3-b"));
    assert!(!winner.conflicted);
    assert_eq!(store.all_revisions("doc", false).unwrap().len(), 3);
}

#[test]
fn test_purge_updates_cached_handle() {
    let store = TestStore::new();
    create(&store, "doc", json!({}));
    let handle = store.existing_document("doc").unwrap();
    assert!(handle.current_revision().is_some());

    store
        .purge_revisions(&purge_request(&[("doc", &["*"])]))
        .unwrap();
    assert!(store.cached_document("doc").is_none());
    assert!(store.document("doc").unwrap().current_revision().is_none());
}

#[test]
fn test_purge_survives_reopen() {
    let store = TestStore::new();
    replicate(&store, "doc", &["2-a", "1-root"]);
    replicate(&store, "doc", &["2-b", "1-root"]);
    store
        .purge_revisions(&purge_request(&[("doc", &["2-b"])]))
        .unwrap();

    let store = store.reopen();
    assert_eq!(leaf_ids(&store, "doc"), vec![rev("2-a")]);
    assert!(!store.winning_revision("doc").unwrap().conflicted);
}
