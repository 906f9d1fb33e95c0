//! Compaction keeps leaves intact and reclaims everything else.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::config::StoreConfig;
use crate::e2e_tests::helpers::{TestStore, create, leaf_ids, replicate, rev, update};
use crate::store::{CompactionConfig, ContentOptions, DocumentStore, spawn_compaction_task};

#[test]
fn test_compaction_keeps_leaves_and_history() {
    let store = TestStore::new();
    let first = create(
        &store,
        "doc",
        json!({"v": 1, "_attachments": {"a.bin": {"data": STANDARD.encode(b"first")}}}),
    );
    let second = update(&store, &first, json!({"v": 2}));
    replicate(&store, "doc", &["2-zzz", "1-other"]);

    let report = store.compact().unwrap();
    assert_eq!(report.bodies_pruned, 1);
    assert_eq!(report.blobs_deleted, 1);
    assert_eq!(store.blob_store().count().unwrap(), 0);

    let info = store
        .get_document(
            "doc",
            Some(&second.rev_id),
            &ContentOptions {
                include_revs_info: true,
                ..ContentOptions::default()
            },
        )
        .unwrap();
    let revs_info = info.body.unwrap()["_revs_info"].clone();
    assert_eq!(revs_info[0]["status"], json!("available"));
    assert_eq!(revs_info[1]["status"], json!("missing"));

    assert_eq!(leaf_ids(&store, "doc").len(), 2);
    assert_eq!(store.winning_revision("doc").unwrap().rev_id, rev("2-zzz"));
    assert_eq!(store.latest_sequence().unwrap(), 4);
}

#[test]
fn test_compaction_shrinks_the_log_and_survives_reopen() {
    let store = TestStore::new();
    let mut current = create(&store, "doc", json!({"payload": "x".repeat(256)}));
    for i in 0..20 {
        current = update(&store, &current, json!({"payload": "x".repeat(256), "i": i}));
    }

    let report = store.compact().unwrap();
    assert!(report.log_bytes_after < report.log_bytes_before);

    let store = store.reopen();
    assert_eq!(store.all_revisions("doc", false).unwrap().len(), 21);
    let doc = store
        .get_document("doc", None, &ContentOptions::default())
        .unwrap();
    assert_eq!(doc.rev_id, current.rev_id);
    assert_eq!(doc.body.unwrap()["i"], json!(19));

    let next = create(&store, "after", json!({}));
    assert_eq!(next.sequence, Some(22));
}

#[tokio::test]
async fn test_background_task_compacts_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DocumentStore::open(StoreConfig::new(dir.path())).unwrap());
    let first = store
        .put_revision(
            crate::types::DocumentEdit::new("doc", crate::testing::body(json!({"v": 1}))),
            None,
            false,
        )
        .unwrap();
    store
        .put_revision(
            crate::types::DocumentEdit::new("doc", crate::testing::body(json!({"v": 2}))),
            Some(&first.rev_id),
            false,
        )
        .unwrap();

    let handle = spawn_compaction_task(
        Arc::downgrade(&store),
        store.compaction_notify(),
        CompactionConfig {
            interval: Some(Duration::from_millis(20)),
        },
    );

    let mut pruned = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if store
            .get_document("doc", Some(&first.rev_id), &ContentOptions::default())
            .is_err()
        {
            pruned = true;
            break;
        }
    }
    assert!(pruned, "interval compaction should prune the old body");

    drop(store);
    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "task should exit once the store is gone");
}
