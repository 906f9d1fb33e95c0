//! Common helpers for end-to-end tests.

use serde_json::Value;

pub use crate::testing::{TestStore, body};
use crate::store::ForceInsertOutcome;
use crate::types::{DocumentEdit, RevId, Revision};

/// Parse a revision id literal.
#[allow(clippy::expect_used)]
pub fn rev(s: &str) -> RevId {
    s.parse().expect("valid revision id")
}

/// Create `doc_id` with `value` as its body.
#[allow(clippy::expect_used)]
pub fn create(store: &TestStore, doc_id: &str, value: Value) -> Revision {
    store
        .put_revision(DocumentEdit::new(doc_id, body(value)), None, false)
        .expect("create document")
}

/// Write `value` as a child of `prev`.
#[allow(clippy::expect_used)]
pub fn update(store: &TestStore, prev: &Revision, value: Value) -> Revision {
    store
        .put_revision(
            DocumentEdit::new(prev.doc_id.as_str(), body(value)),
            Some(&prev.rev_id),
            false,
        )
        .expect("update document")
}

/// Replicate a leaf with the given history (newest first) and an empty body.
#[allow(clippy::expect_used)]
pub fn replicate(store: &TestStore, doc_id: &str, history: &[&str]) -> ForceInsertOutcome {
    let history: Vec<RevId> = history.iter().map(|id| rev(id)).collect();
    let leaf = Revision::new(doc_id, history[0].clone(), false)
        .with_body(body(serde_json::json!({"leaf": history[0].to_string()})));
    store
        .force_insert(leaf, &history, Some("http://peer/db"))
        .expect("force insert")
}

/// Ids of the document's current leaves, newest sequence first.
#[allow(clippy::expect_used)]
pub fn leaf_ids(store: &TestStore, doc_id: &str) -> Vec<RevId> {
    store
        .all_revisions(doc_id, true)
        .expect("list leaves")
        .into_iter()
        .map(|rev| rev.rev_id)
        .collect()
}
