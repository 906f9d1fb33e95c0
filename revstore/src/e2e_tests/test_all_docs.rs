//! Listing documents by id.

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, create};
use crate::store::{AllDocsOptions, AllDocsResult};
use crate::types::DocumentEdit;

fn ids(result: &AllDocsResult) -> Vec<&str> {
    result.rows.iter().map(|row| row.id.as_str()).collect()
}

fn populated() -> TestStore {
    let store = TestStore::new();
    for doc_id in ["delta", "alpha", "echo", "charlie", "bravo"] {
        create(&store, doc_id, json!({"name": doc_id}));
    }
    let echo = store.winning_revision("echo").unwrap();
    store
        .put_revision(DocumentEdit::deletion("echo"), Some(&echo.rev_id), false)
        .unwrap();
    store
}

#[test]
fn test_lists_live_documents_in_id_order() {
    let store = populated();
    let result = store.all_docs(&AllDocsOptions::default()).unwrap();
    assert_eq!(ids(&result), vec!["alpha", "bravo", "charlie", "delta"]);
    assert_eq!(result.total_rows, 4);
    assert_eq!(result.update_seq, 6);
    assert!(result.rows.iter().all(|row| row.doc.is_none()));
    assert_eq!(store.document_count().unwrap(), 4);
}

#[test]
fn test_range_skip_limit_and_descending() {
    let store = populated();
    let ranged = store
        .all_docs(&AllDocsOptions {
            start_key: Some(json!("b")),
            end_key: Some(json!("d")),
            ..AllDocsOptions::default()
        })
        .unwrap();
    assert_eq!(ids(&ranged), vec!["bravo", "charlie"]);

    let paged = store
        .all_docs(&AllDocsOptions {
            skip: 1,
            limit: Some(2),
            ..AllDocsOptions::default()
        })
        .unwrap();
    assert_eq!(ids(&paged), vec!["bravo", "charlie"]);
    assert_eq!(paged.offset, 1);

    let descending = store
        .all_docs(&AllDocsOptions {
            descending: true,
            start_key: Some(json!("charlie")),
            include_deleted: true,
            ..AllDocsOptions::default()
        })
        .unwrap();
    assert_eq!(ids(&descending), vec!["charlie", "bravo", "alpha"]);
}

#[test]
fn test_include_deleted_and_docs() {
    let store = populated();
    let result = store
        .all_docs(&AllDocsOptions {
            include_deleted: true,
            include_docs: true,
            ..AllDocsOptions::default()
        })
        .unwrap();
    assert_eq!(result.rows.len(), 5);
    let echo = result.rows.iter().find(|row| row.id == "echo").unwrap();
    assert!(echo.deleted);
    assert!(echo.doc.is_none());
    let alpha = &result.rows[0];
    assert_eq!(alpha.doc.as_ref().unwrap()["name"], json!("alpha"));
}

#[test]
fn test_explicit_keys_keep_request_order() {
    let store = populated();
    let result = store
        .all_docs(&AllDocsOptions {
            keys: Some(vec![
                "delta".to_string(),
                "nope".to_string(),
                "alpha".to_string(),
            ]),
            ..AllDocsOptions::default()
        })
        .unwrap();
    assert_eq!(ids(&result), vec!["delta", "nope", "alpha"]);
    assert_eq!(result.rows[1].error.as_deref(), Some("not_found"));
    assert!(result.rows[1].rev_id.is_none());
    assert_eq!(result.rows[0].key, json!("delta"));
    assert_eq!(result.rows[0].rev_id.as_ref().unwrap().generation(), 1);
}
