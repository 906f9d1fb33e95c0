//! Validations gate local writes but not replicated ones.

use std::sync::Arc;

use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, body, create, replicate};
use crate::store::{DEFAULT_REJECTION, StoreError, ValidationContext, Verdict};
use crate::types::{DocumentEdit, Revision};

fn require_owner(candidate: &Revision, _: Option<&Revision>, _: &ValidationContext<'_>) -> Verdict {
    if candidate.deleted || candidate.property("owner").is_some() {
        Verdict::Accept
    } else {
        Verdict::reject("owner is required")
    }
}

#[test]
fn test_rejected_edit_is_forbidden_and_not_stored() {
    let store = TestStore::new();
    store.define_validation("owner", Some(Arc::new(require_owner)));

    let err = store
        .put_revision(DocumentEdit::new("doc", body(json!({"title": "x"}))), None, false)
        .unwrap_err();
    let StoreError::Forbidden(message) = &err else {
        panic!("expected Forbidden, got {err:?}");
    };
    assert_eq!(message, "owner is required");
    assert_eq!(err.status_code(), 403);
    assert_eq!(store.latest_sequence().unwrap(), 0);

    create(&store, "doc", json!({"owner": "sam"}));
    assert_eq!(store.latest_sequence().unwrap(), 1);
}

#[test]
fn test_validation_sees_previous_revision() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({"owner": "sam", "title": "a"}));
    store.define_validation(
        "immutable-owner",
        Some(Arc::new(
            |_: &Revision, previous: Option<&Revision>, context: &ValidationContext<'_>| {
                if previous.is_some() && context.changed_keys().contains("owner") {
                    Verdict::reject("")
                } else {
                    Verdict::Accept
                }
            },
        )),
    );

    let err = store
        .put_revision(
            DocumentEdit::new("doc", body(json!({"owner": "alex", "title": "a"}))),
            Some(&first.rev_id),
            false,
        )
        .unwrap_err();
    assert!(matches!(&err, StoreError::Forbidden(message) if message == DEFAULT_REJECTION));

    store
        .put_revision(
            DocumentEdit::new("doc", body(json!({"owner": "sam", "title": "b"}))),
            Some(&first.rev_id),
            false,
        )
        .unwrap();
}

#[test]
fn test_replicated_revisions_skip_validation() {
    let store = TestStore::new();
    store.define_validation("owner", Some(Arc::new(require_owner)));
    replicate(&store, "doc", &["1-remote"]);
    assert_eq!(store.latest_sequence().unwrap(), 1);

    store.define_validation("owner", None);
    assert!(store.validation("owner").is_none());
    create(&store, "free", json!({}));
}
