//! Reopening a store restores every committed write.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, create, leaf_ids, replicate, rev, update};
use crate::store::ContentOptions;

#[test]
fn test_reopen_restores_trees_attachments_and_checkpoints() {
    let store = TestStore::new();
    let first = create(
        &store,
        "doc",
        json!({"v": 1, "_attachments": {"a.txt": {"data": STANDARD.encode(b"persisted")}}}),
    );
    let second = update(
        &store,
        &first,
        json!({"v": 2, "_attachments": {"a.txt": {"stub": true, "revpos": 1}}}),
    );
    replicate(&store, "doc", &["2-zz", "1-other"]);
    store
        .set_last_sequence("17", "http://peer/db", false)
        .unwrap();
    let uuid = store.public_uuid().unwrap();

    let store = store.reopen();
    assert_eq!(store.latest_sequence().unwrap(), 4);
    assert_eq!(leaf_ids(&store, "doc"), vec![rev("2-zz"), second.rev_id.clone()]);
    assert!(store.winning_revision("doc").unwrap().conflicted);
    assert_eq!(
        store
            .get_attachment("doc", Some(&second.rev_id), "a.txt")
            .unwrap()
            .data,
        b"persisted"
    );
    let old = store
        .get_document("doc", Some(&first.rev_id), &ContentOptions::default())
        .unwrap();
    assert_eq!(old.body.unwrap()["v"], json!(1));
    assert_eq!(
        store
            .last_sequence_with_remote("http://peer/db", false)
            .unwrap()
            .as_deref(),
        Some("17")
    );
    assert_eq!(
        store.last_sequence_with_remote("http://peer/db", true).unwrap(),
        None
    );
    assert_eq!(store.public_uuid().unwrap(), uuid);
}

#[test]
fn test_torn_log_tail_is_discarded() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"v": 1}));
    let log_path = store.config().log_path();

    let store = {
        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        log.write_all(&[0x07, 0x00, 0x01]).unwrap();
        drop(log);
        store.reopen()
    };

    assert_eq!(store.latest_sequence().unwrap(), 1);
    assert_eq!(store.winning_revision("doc").unwrap().rev_id, first.rev_id);

    let second = update(&store, &first, json!({"v": 2}));
    let store = store.reopen();
    assert_eq!(store.winning_revision("doc").unwrap().rev_id, second.rev_id);
}
