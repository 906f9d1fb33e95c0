//! Attachments: inline and streamed content, stubs, blob sharing.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create, update};
use crate::store::{AttachmentContent, ContentOptions, StoreError, stub_out_attachments};
use crate::types::DocumentEdit;

fn with_attachment(content: &[u8]) -> serde_json::Value {
    json!({
        "title": "report",
        "_attachments": {
            "report.txt": {"content_type": "text/plain", "data": STANDARD.encode(content)}
        }
    })
}

#[test]
fn test_inline_attachment_round_trip() {
    let store = TestStore::new();
    let rev = create(&store, "doc", with_attachment(b"quarterly numbers"));

    let attachment = store.get_attachment("doc", None, "report.txt").unwrap();
    assert_eq!(attachment.data, b"quarterly numbers");
    assert_eq!(attachment.content_type.as_deref(), Some("text/plain"));

    let body = rev.body.unwrap();
    let stub = &body["_attachments"]["report.txt"];
    assert_eq!(stub["stub"], json!(true));
    assert_eq!(stub["revpos"], json!(1));
    assert_eq!(stub["length"], json!(17));

    let inline = store
        .get_document(
            "doc",
            None,
            &ContentOptions {
                include_attachments: true,
                ..ContentOptions::default()
            },
        )
        .unwrap();
    let data = inline.body.unwrap()["_attachments"]["report.txt"]["data"].clone();
    assert_eq!(data, json!(STANDARD.encode(b"quarterly numbers")));
}

#[test]
fn test_identical_content_shares_one_blob() {
    let store = TestStore::new();
    create(&store, "one", with_attachment(b"same bytes"));
    create(&store, "two", with_attachment(b"same bytes"));
    assert_eq!(store.blob_store().count().unwrap(), 1);

    let one = store.get_attachment("one", None, "report.txt").unwrap();
    let two = store.get_attachment("two", None, "report.txt").unwrap();
    assert_eq!(one, two);
}

#[test]
fn test_stubs_carry_attachments_forward() {
    let store = TestStore::new();
    let first = create(&store, "doc", with_attachment(b"v1"));
    let second = update(
        &store,
        &first,
        json!({
            "title": "renamed",
            "_attachments": {"report.txt": {"stub": true, "revpos": 1}}
        }),
    );
    let third = update(&store, &second, json!({"title": "no attachments"}));

    let carried = store
        .attachment_for_sequence(second.sequence.unwrap(), "report.txt")
        .unwrap();
    assert_eq!(carried.data, b"v1");
    assert!(matches!(
        store.get_attachment("doc", Some(&third.rev_id), "report.txt"),
        Err(StoreError::NotFound(_))
    ));

    let err = store
        .put_revision(
            DocumentEdit::new(
                "doc",
                body(json!({"_attachments": {"other.txt": {"stub": true, "revpos": 1}}})),
            ),
            Some(&third.rev_id),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_streamed_attachment_follows() {
    let store = TestStore::new();
    let mut writer = store.attachment_writer().unwrap();
    writer.write_all(b"chunk one, ").unwrap();
    writer.write_all(b"chunk two").unwrap();
    let digest = store.register_pending_attachment(writer);

    let rev = create(
        &store,
        "doc",
        json!({"_attachments": {"big.bin": {"follows": true, "digest": digest}}}),
    );
    let attachment = store.get_attachment("doc", Some(&rev.rev_id), "big.bin").unwrap();
    assert_eq!(attachment.data, b"chunk one, chunk two");

    let path = store
        .attachment_path_for_sequence(rev.sequence.unwrap(), "big.bin")
        .unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"chunk one, chunk two");
}

#[test]
fn test_mismatched_digest_is_rejected() {
    let store = TestStore::new();
    let err = store
        .put_revision(
            DocumentEdit::new(
                "doc",
                body(json!({"_attachments": {"a": {
                    "data": STANDARD.encode(b"x"),
                    "digest": "sha1-AAAAAAAAAAAAAAAAAAAAAAAAAAA="
                }}})),
            ),
            None,
            false,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Attachment(_)));
    assert_eq!(store.latest_sequence().unwrap(), 0);
}

#[test]
fn test_update_attachment_adds_and_removes() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"title": "t"}));

    let added = store
        .update_attachment(
            "notes.md",
            Some(AttachmentContent::new(
                b"# Notes".to_vec(),
                Some("text/markdown".to_string()),
            )),
            "doc",
            Some(&first.rev_id),
        )
        .unwrap();
    assert_eq!(added.rev_id.generation(), 2);
    let notes = store.get_attachment("doc", None, "notes.md").unwrap();
    assert_eq!(notes.data, b"# Notes");

    let doc = store
        .get_document("doc", None, &ContentOptions::default())
        .unwrap();
    assert_eq!(doc.body.unwrap()["title"], json!("t"));

    let removed = store
        .update_attachment("notes.md", None, "doc", Some(&added.rev_id))
        .unwrap();
    assert!(matches!(
        store.get_attachment("doc", Some(&removed.rev_id), "notes.md"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_stub_out_on_read_body_is_idempotent() {
    let store = TestStore::new();
    let first = create(&store, "doc", with_attachment(b"old"));
    update(
        &store,
        &first,
        json!({"_attachments": {
            "report.txt": {"stub": true, "revpos": 1},
            "fresh.txt": {"data": STANDARD.encode(b"new")}
        }}),
    );
    let doc = store
        .get_document(
            "doc",
            None,
            &ContentOptions {
                include_attachments: true,
                ..ContentOptions::default()
            },
        )
        .unwrap();
    let mut body = doc.body.unwrap();

    stub_out_attachments(&mut body, 2);
    let once = body.clone();
    stub_out_attachments(&mut body, 2);
    assert_eq!(body, once);

    let attachments = &body["_attachments"];
    assert_eq!(attachments["report.txt"]["stub"], json!(true));
    assert!(attachments["report.txt"].get("data").is_none());
    assert!(attachments["fresh.txt"].get("data").is_some());
}

#[test]
fn test_garbage_collection_keeps_referenced_blobs() {
    let store = TestStore::new();
    let first = create(&store, "doc", with_attachment(b"kept"));
    let orphan = store.blob_store().put(b"nobody points here").unwrap();
    assert!(store.blob_store().exists(&orphan));

    assert_eq!(store.garbage_collect_attachments().unwrap(), 1);
    assert!(!store.blob_store().exists(&orphan));
    assert_eq!(
        store.get_attachment("doc", Some(&first.rev_id), "report.txt").unwrap().data,
        b"kept"
    );
}
