//! Local documents: tag rules, no sequences, durability.

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create};
use crate::store::{ChangesOptions, StoreError};
use crate::types::RevId;

#[test]
fn test_local_document_tag_rules() {
    let store = TestStore::new();

    let created = store
        .put_local("sync-state", &body(json!({"since": 0})), None)
        .unwrap();
    assert_eq!(created.tag, RevId::local(1));

    // Missing or stale tags conflict.
    for tag in [None, Some(RevId::local(2))] {
        let err = store
            .put_local("sync-state", &body(json!({"since": 9})), tag.as_ref())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    let mut tag = created.tag;
    for since in 1..=3 {
        tag = store
            .put_local("sync-state", &body(json!({"since": since})), Some(&tag))
            .unwrap()
            .tag;
    }
    assert_eq!(tag, RevId::local(4));
    assert_eq!(
        store.get_local("sync-state", None).unwrap().body["since"],
        json!(3)
    );

    assert!(matches!(
        store.delete_local("sync-state", Some(&RevId::local(1))),
        Err(StoreError::Conflict(_))
    ));
    store.delete_local("sync-state", Some(&tag)).unwrap();
    assert!(matches!(
        store.delete_local("sync-state", Some(&tag)),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_local_documents_stay_out_of_the_revision_store() {
    let store = TestStore::new();
    create(&store, "doc", json!({}));
    store
        .put_local("_local/checkpoint", &body(json!({"seq": 1})), None)
        .unwrap();

    assert_eq!(store.latest_sequence().unwrap(), 1);
    let changes = store
        .changes_since(0, &ChangesOptions::default(), None)
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(store.document_count().unwrap(), 1);
    assert!(store.all_revisions("_local/checkpoint", false).unwrap().is_empty());
}

#[test]
fn test_local_documents_survive_reopen() {
    let store = TestStore::new();
    let doc = store
        .put_local("checkpoint", &body(json!({"seq": 42})), None)
        .unwrap();

    let store = store.reopen();
    let read = store.get_local("checkpoint", Some(&doc.tag)).unwrap();
    assert_eq!(read.body["seq"], json!(42));
    assert_eq!(read.body["_id"], json!("_local/checkpoint"));
}
