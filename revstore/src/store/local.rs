//! Local documents.
//!
//! A local document has a single version guarded by a tag of the form
//! `<n>-local`. Local documents never replicate, never get a sequence and
//! never appear in the change feed.

use serde_json::Value;

use crate::storage::LocalDocRow;
use crate::store::body::{decode_body, encode_body};
use crate::store::{DocumentStore, StoreError};
use crate::types::{Body, LOCAL_PREFIX, RevId};

/// A local document as read or written.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    /// Full id, always starting with `_local/`.
    pub doc_id: String,
    /// Tag a later update or delete must present.
    pub tag: RevId,
    /// Properties plus `_id` and `_rev`.
    pub body: Body,
}

impl LocalDocument {
    #[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
    fn from_row(row: &LocalDocRow) -> Result<Self, StoreError> {
        let mut body = decode_body(&row.body)?;
        body.insert("_id".to_string(), Value::String(row.doc_id.clone()));
        body.insert("_rev".to_string(), Value::String(row.tag.to_string()));
        Ok(Self {
            doc_id: row.doc_id.clone(),
            tag: row.tag.clone(),
            body,
        })
    }
}

/// `id` with the `_local/` prefix added if it lacks one.
fn normalize(id: &str) -> Result<String, StoreError> {
    let doc_id = if id.starts_with(LOCAL_PREFIX) {
        id.to_string()
    } else {
        format!("{LOCAL_PREFIX}{id}")
    };
    if doc_id.len() == LOCAL_PREFIX.len() {
        return Err(StoreError::bad_request("local document id must not be empty"));
    }
    Ok(doc_id)
}

fn mismatch(doc_id: &str) -> StoreError {
    StoreError::conflict(format!("local document '{doc_id}' tag mismatch"))
}

impl DocumentStore {
    /// Create or replace a local document.
    ///
    /// Creating requires no `prev_tag` and yields tag `1-local`. Replacing
    /// requires the current tag and increments its number.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a tag is given for a document that does not exist.
    /// - `Conflict` if the document exists and the tag is missing or stale.
    /// - `BadRequest` for an empty id or an unknown `_` property.
    pub fn put_local(
        &self,
        id: &str,
        body: &Body,
        prev_tag: Option<&RevId>,
    ) -> Result<LocalDocument, StoreError> {
        let doc_id = normalize(id)?;
        let encoded = encode_body(body)?;

        let mut db = self.write()?;
        let tag = match (db.local(&doc_id), prev_tag) {
            (None, None) => RevId::local(1),
            (None, Some(_)) => {
                return Err(StoreError::not_found(format!(
                    "local document '{doc_id}' not found"
                )));
            }
            (Some(row), Some(prev)) if row.tag == *prev => RevId::local(prev.next_generation()?),
            (Some(_), _) => return Err(mismatch(&doc_id)),
        };

        let row = LocalDocRow {
            doc_id,
            tag,
            body: encoded,
        };
        #[allow(clippy::disallowed_methods)] // Clone needed: row is stored and returned
        let stored = row.clone();
        db.run_in_transaction(|db| db.put_local(stored))?;
        tracing::debug!(doc_id = %row.doc_id, tag = %row.tag, "Stored local document");
        LocalDocument::from_row(&row)
    }

    /// Read a local document, optionally requiring a specific tag.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document is absent or `tag` does not match.
    pub fn get_local(&self, id: &str, tag: Option<&RevId>) -> Result<LocalDocument, StoreError> {
        let doc_id = normalize(id)?;
        let db = self.read()?;
        let row = db
            .local(&doc_id)
            .filter(|row| tag.is_none_or(|tag| row.tag == *tag))
            .ok_or_else(|| StoreError::not_found(format!("local document '{doc_id}' not found")))?;
        LocalDocument::from_row(row)
    }

    /// Delete a local document.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the document is absent.
    /// - `Conflict` if `tag` is missing or does not match.
    pub fn delete_local(&self, id: &str, tag: Option<&RevId>) -> Result<(), StoreError> {
        let doc_id = normalize(id)?;
        let mut db = self.write()?;
        let Some(row) = db.local(&doc_id) else {
            return Err(StoreError::not_found(format!(
                "local document '{doc_id}' not found"
            )));
        };
        if tag.is_none_or(|tag| row.tag != *tag) {
            return Err(mismatch(&doc_id));
        }
        db.run_in_transaction(|db| db.delete_local(&doc_id))?;
        tracing::debug!(%doc_id, "Deleted local document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestStore, body};
    use serde_json::json;

    #[test]
    fn test_tag_lifecycle() {
        let store = TestStore::new();
        let created = store.put_local("checkpoint", &body(json!({"seq": 1})), None).unwrap();
        assert_eq!(created.doc_id, "_local/checkpoint");
        assert_eq!(created.tag.to_string(), "1-local");
        assert_eq!(created.body["_rev"], json!("1-local"));

        let err = store
            .put_local("checkpoint", &body(json!({"seq": 2})), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let updated = store
            .put_local("_local/checkpoint", &body(json!({"seq": 2})), Some(&created.tag))
            .unwrap();
        assert_eq!(updated.tag.to_string(), "2-local");

        let err = store
            .put_local("checkpoint", &body(json!({"seq": 3})), Some(&created.tag))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let read = store.get_local("checkpoint", None).unwrap();
        assert_eq!(read.body["seq"], json!(2));
        assert!(store.get_local("checkpoint", Some(&created.tag)).is_err());
        assert_eq!(store.latest_sequence().unwrap(), 0);
    }

    #[test]
    fn test_put_with_tag_for_missing_doc_is_not_found() {
        let store = TestStore::new();
        let err = store
            .put_local("x", &body(json!({})), Some(&RevId::local(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_rules() {
        let store = TestStore::new();
        assert!(matches!(
            store.delete_local("x", Some(&RevId::local(1))),
            Err(StoreError::NotFound(_))
        ));

        let doc = store.put_local("x", &body(json!({})), None).unwrap();
        assert!(matches!(
            store.delete_local("x", None),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.delete_local("x", Some(&RevId::local(7))),
            Err(StoreError::Conflict(_))
        ));
        store.delete_local("x", Some(&doc.tag)).unwrap();
        assert!(matches!(
            store.get_local("x", None),
            Err(StoreError::NotFound(_))
        ));

        let recreated = store.put_local("x", &body(json!({})), None).unwrap();
        assert_eq!(recreated.tag, RevId::local(1));
    }

    #[test]
    fn test_empty_id_rejected() {
        let store = TestStore::new();
        assert!(matches!(
            store.put_local("_local/", &body(json!({})), None),
            Err(StoreError::BadRequest(_))
        ));
    }
}
