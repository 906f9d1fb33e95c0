//! Revision values as seen by callers of the store.

use serde_json::{Map, Value};

use crate::types::ids::{RevId, Sequence};

/// A JSON document body: a map from property name to value.
pub type Body = Map<String, Value>;

/// Underscore-prefixed properties with a reserved meaning.
///
/// Any other property starting with `_` is rejected on write. None of
/// these are persisted as part of the stored body; they are regenerated
/// from tree metadata on read.
pub const KNOWN_SPECIAL_KEYS: [&str; 8] = [
    "_id",
    "_rev",
    "_attachments",
    "_deleted",
    "_revisions",
    "_revs_info",
    "_conflicts",
    "_deleted_conflicts",
];

/// Check whether `key` is one of [`KNOWN_SPECIAL_KEYS`].
#[must_use]
pub fn is_known_special_key(key: &str) -> bool {
    KNOWN_SPECIAL_KEYS.contains(&key)
}

/// One stored revision of a document.
///
/// `body` is `None` when the revision was loaded without content, when it
/// is a tombstone, or when its body has been pruned by compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// Id of the document this revision belongs to.
    pub doc_id: String,
    /// Revision id (`<generation>-<digest>`).
    pub rev_id: RevId,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// Sequence assigned when the revision was stored locally.
    pub sequence: Option<Sequence>,
    /// Document content, including any expanded `_` properties.
    pub body: Option<Body>,
}

impl Revision {
    /// Create a revision without a body or sequence.
    #[must_use]
    pub fn new(doc_id: impl Into<String>, rev_id: RevId, deleted: bool) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id,
            deleted,
            sequence: None,
            body: None,
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a sequence.
    #[must_use]
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Generation of the revision id.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.rev_id.generation()
    }

    /// The `_attachments` object of the body, if any.
    #[must_use]
    pub fn attachments(&self) -> Option<&Map<String, Value>> {
        self.body
            .as_ref()
            .and_then(|body| body.get("_attachments"))
            .and_then(Value::as_object)
    }

    /// Look up a top-level property of the body.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.body.as_ref().and_then(|body| body.get(key))
    }

    /// The body with `_id`, `_rev` and (for tombstones) `_deleted` filled in.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Clone needed: body stays on the revision
    pub fn properties(&self) -> Body {
        let mut body = self.body.clone().unwrap_or_default();
        body.insert("_id".to_string(), Value::String(self.doc_id.clone()));
        body.insert("_rev".to_string(), Value::String(self.rev_id.to_string()));
        if self.deleted {
            body.insert("_deleted".to_string(), Value::Bool(true));
        }
        body
    }
}

/// A new local edit submitted to `put_revision`.
///
/// The revision id is computed by the store; the caller only supplies the
/// document id (or none, to have one generated), the tombstone flag and
/// the content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentEdit {
    /// Target document, or `None` to generate a fresh id.
    pub doc_id: Option<String>,
    /// Whether this edit deletes the document.
    pub deleted: bool,
    /// New content. Required unless `deleted`.
    pub body: Option<Body>,
}

impl DocumentEdit {
    /// An edit that writes `body` to `doc_id`.
    #[must_use]
    pub fn new(doc_id: impl Into<String>, body: Body) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            deleted: false,
            body: Some(body),
        }
    }

    /// An edit that creates a document with a generated id.
    #[must_use]
    pub const fn with_generated_id(body: Body) -> Self {
        Self {
            doc_id: None,
            deleted: false,
            body: Some(body),
        }
    }

    /// An edit that deletes `doc_id`.
    #[must_use]
    pub fn deletion(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            deleted: true,
            body: None,
        }
    }
}

/// The revision a document currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinningRevision {
    /// Id of the winning leaf.
    pub rev_id: RevId,
    /// Sequence of the winning leaf.
    pub sequence: Sequence,
    /// Whether the winner is a tombstone, i.e. the document is deleted.
    pub deleted: bool,
    /// Whether two or more non-deleted leaves exist.
    pub conflicted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Body {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_properties_adds_metadata() {
        let rev = Revision::new("doc", "2-ab".parse().unwrap(), false)
            .with_body(body(json!({"a": 1})));
        let props = rev.properties();
        assert_eq!(props.get("_id"), Some(&json!("doc")));
        assert_eq!(props.get("_rev"), Some(&json!("2-ab")));
        assert_eq!(props.get("a"), Some(&json!(1)));
        assert!(!props.contains_key("_deleted"));
    }

    #[test]
    fn test_properties_of_tombstone() {
        let rev = Revision::new("doc", "3-cd".parse().unwrap(), true);
        assert_eq!(rev.properties().get("_deleted"), Some(&json!(true)));
    }

    #[test]
    fn test_attachments_accessor() {
        let rev = Revision::new("doc", "1-x".parse().unwrap(), false)
            .with_body(body(json!({"_attachments": {"a.txt": {"stub": true}}})));
        assert!(rev.attachments().unwrap().contains_key("a.txt"));
        assert!(Revision::new("doc", "1-x".parse().unwrap(), false)
            .attachments()
            .is_none());
    }

    #[test]
    fn test_special_keys() {
        assert!(is_known_special_key("_conflicts"));
        assert!(!is_known_special_key("_foo"));
        assert!(!is_known_special_key("_local_seq"));
    }
}
