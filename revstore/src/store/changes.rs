//! The change feed: polling by sequence and live subscriptions.

use std::collections::BTreeMap;

use futures::Stream;
use tokio::sync::broadcast;

use crate::storage::{DocKey, RevisionRow};
use crate::store::history::ContentOptions;
use crate::store::validation::ChangeFilter;
use crate::store::winner::winning_order;
use crate::store::{DocumentStore, StoreError};
use crate::types::{DatabaseChange, Revision, Sequence};

/// Options of [`DocumentStore::changes_since`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesOptions {
    /// Maximum number of revisions returned.
    pub limit: Option<usize>,
    /// Return bodies with each revision.
    pub include_docs: bool,
    /// Return every changed leaf of a document, not only its first one.
    pub include_conflicts: bool,
    /// Order the result by sequence instead of by document.
    pub sort_by_sequence: bool,
    /// How bodies are expanded when loaded.
    pub content: ContentOptions,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            limit: None,
            include_docs: false,
            include_conflicts: false,
            sort_by_sequence: true,
            content: ContentOptions::default(),
        }
    }
}

impl DocumentStore {
    /// Leaves stored after sequence `since`.
    ///
    /// Rows are grouped per document in winning order; unless
    /// `include_conflicts` is set only the first row of each document is
    /// kept. When a filter is given, each row's body is loaded before the
    /// filter runs if the filter needs it. The result is then sorted by
    /// sequence (if requested) and cut to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if a body cannot be decoded or an attachment blob
    /// cannot be read.
    pub fn changes_since(
        &self,
        since: Sequence,
        options: &ChangesOptions,
        filter: Option<&dyn ChangeFilter>,
    ) -> Result<Vec<Revision>, StoreError> {
        let db = self.read()?;

        let mut by_doc: BTreeMap<DocKey, Vec<&RevisionRow>> = BTreeMap::new();
        for row in db.revisions_since(since).filter(|row| row.current) {
            by_doc.entry(row.doc_key).or_default().push(row);
        }

        let needs_body =
            options.include_docs || filter.is_some_and(|filter| filter.requires_body());
        let mut changes = Vec::new();
        for (key, mut rows) in by_doc {
            let Some(doc_id) = db.doc_id(key) else {
                continue;
            };
            rows.sort_by(|a, b| winning_order(a, b));
            if !options.include_conflicts {
                rows.truncate(1);
            }
            for row in rows {
                #[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
                let mut revision = Revision::new(doc_id, row.rev_id.clone(), row.deleted)
                    .with_sequence(row.sequence);
                if needs_body {
                    revision.body = Some(self.expand_row(&db, doc_id, row, &options.content)?);
                }
                if filter.is_some_and(|filter| !filter.accept(&revision)) {
                    continue;
                }
                if !options.include_docs {
                    revision.body = None;
                }
                changes.push(revision);
            }
        }

        if options.sort_by_sequence {
            changes.sort_by_key(|revision| revision.sequence);
        }
        if let Some(limit) = options.limit {
            changes.truncate(limit);
        }
        Ok(changes)
    }

    /// Highest sequence ever assigned, zero for an empty store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn latest_sequence(&self) -> Result<Sequence, StoreError> {
        Ok(self.read()?.last_sequence())
    }

    /// Listen for changes committed from now on.
    #[must_use]
    pub fn subscribe(&self) -> ChangeReceiver {
        ChangeReceiver {
            receiver: self.changes.subscribe(),
            excluded_source: None,
        }
    }
}

/// A live change subscription.
///
/// A receiver that falls more than the channel capacity behind skips the
/// changes it missed and logs a warning; callers that must not miss a
/// change resume with [`DocumentStore::changes_since`].
#[derive(Debug)]
pub struct ChangeReceiver {
    receiver: broadcast::Receiver<DatabaseChange>,
    excluded_source: Option<String>,
}

impl ChangeReceiver {
    /// Skip changes that arrived from `source`, e.g. the peer a puller is
    /// reading from.
    #[must_use]
    pub fn excluding_source(mut self, source: impl Into<String>) -> Self {
        self.excluded_source = Some(source.into());
        self
    }

    /// Wait for the next change. Returns `None` once the store is dropped.
    pub async fn recv(&mut self) -> Option<DatabaseChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if self.excluded_source.is_some()
                        && change.source.as_deref() == self.excluded_source.as_deref()
                    {
                        continue;
                    }
                    return Some(change);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!("change receiver lagged by {count} messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("change channel closed");
                    return None;
                }
            }
        }
    }

    /// Adapt the receiver into a stream of changes.
    pub fn into_stream(self) -> impl Stream<Item = DatabaseChange> {
        futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|change| (change, receiver))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;
    use crate::testing::{TestStore, body};
    use crate::types::{DocumentEdit, RevId};
    use serde_json::json;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    fn put(store: &TestStore, doc_id: &str, prev: Option<&RevId>) -> Revision {
        store
            .put_revision(
                DocumentEdit::new(doc_id, body(json!({"id": doc_id}))),
                prev,
                false,
            )
            .unwrap()
    }

    #[test]
    fn test_changes_since_returns_current_leaves() {
        let store = TestStore::new();
        let a1 = put(&store, "a", None);
        put(&store, "b", None);
        put(&store, "a", Some(&a1.rev_id));

        let changes = store
            .changes_since(0, &ChangesOptions::default(), None)
            .unwrap();
        let seqs: Vec<_> = changes.iter().map(|rev| rev.sequence.unwrap()).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert!(changes.iter().all(|rev| rev.body.is_none()));

        let later = store
            .changes_since(2, &ChangesOptions::default(), None)
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].doc_id, "a");
        assert_eq!(store.latest_sequence().unwrap(), 3);
    }

    #[test]
    fn test_conflicts_and_limit() {
        let store = TestStore::new();
        for (leaf, history) in [
            ("2-a", vec![rev("2-a"), rev("1-r")]),
            ("2-b", vec![rev("2-b"), rev("1-r")]),
        ] {
            store
                .force_insert(
                    Revision::new("doc", rev(leaf), false).with_body(body(json!({}))),
                    &history,
                    None,
                )
                .unwrap();
        }
        put(&store, "other", None);

        let first_only = store
            .changes_since(0, &ChangesOptions::default(), None)
            .unwrap();
        assert_eq!(first_only.len(), 2);
        assert_eq!(first_only[0].rev_id, rev("2-b"));

        let all = store
            .changes_since(
                0,
                &ChangesOptions {
                    include_conflicts: true,
                    ..ChangesOptions::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(all.len(), 3);

        let limited = store
            .changes_since(
                0,
                &ChangesOptions {
                    include_conflicts: true,
                    limit: Some(2),
                    ..ChangesOptions::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].sequence, Some(2));
    }

    #[test]
    fn test_filter_sees_body() {
        let store = TestStore::new();
        put(&store, "keep", None);
        put(&store, "drop", None);
        store.define_filter(
            "only-keep",
            Some(Arc::new(|rev: &Revision| {
                rev.property("id") == Some(&json!("keep"))
            })),
        );

        let filter = store.filter("only-keep").unwrap();
        let changes = store
            .changes_since(0, &ChangesOptions::default(), Some(filter.as_ref()))
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_id, "keep");
        assert!(changes[0].body.is_none());

        let with_docs = store
            .changes_since(
                0,
                &ChangesOptions {
                    include_docs: true,
                    ..ChangesOptions::default()
                },
                Some(filter.as_ref()),
            )
            .unwrap();
        assert_eq!(with_docs[0].body.as_ref().unwrap()["_id"], json!("keep"));
    }

    #[tokio::test]
    async fn test_subscription_receives_committed_changes() {
        let store = TestStore::new();
        let mut receiver = store.subscribe();
        let first = put(&store, "doc", None);

        let change = receiver.recv().await.unwrap();
        assert_eq!(change.doc_id(), "doc");
        assert_eq!(change.revision.rev_id, first.rev_id);
        assert_eq!(change.sequence, 1);
        assert!(change.source.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_publishes_nothing() {
        let store = TestStore::new();
        let mut receiver = store.subscribe();
        put(&store, "doc", None);
        assert!(
            store
                .put_revision(DocumentEdit::new("doc", body(json!({}))), None, false)
                .is_err()
        );
        put(&store, "next", None);

        assert_eq!(receiver.recv().await.unwrap().sequence, 1);
        assert_eq!(receiver.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_stream_excludes_source() {
        let store = TestStore::new();
        let stream = store.subscribe().excluding_source("http://peer/db").into_stream();
        store
            .force_insert(
                Revision::new("pulled", rev("1-a"), false).with_body(body(json!({}))),
                &[rev("1-a")],
                Some("http://peer/db"),
            )
            .unwrap();
        put(&store, "local", None);

        let changes: Vec<DatabaseChange> = stream.take(1).collect().await;
        assert_eq!(changes[0].doc_id(), "local");
    }
}
