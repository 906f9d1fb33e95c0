//! Change feed: polling by sequence and live subscriptions.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use crate::e2e_tests::helpers::{TestStore, create, replicate, update};
use crate::store::ChangesOptions;
use crate::types::{DatabaseChange, Revision};

#[test]
fn test_polling_resumes_from_a_cursor() {
    let store = TestStore::new();
    let a = create(&store, "a", json!({"n": 1}));
    create(&store, "b", json!({"n": 2}));
    update(&store, &a, json!({"n": 3}));

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let page = store
            .changes_since(
                cursor,
                &ChangesOptions {
                    limit: Some(1),
                    ..ChangesOptions::default()
                },
                None,
            )
            .unwrap();
        let Some(last) = page.last() else {
            break;
        };
        cursor = last.sequence.unwrap();
        seen.extend(page.into_iter().map(|rev| rev.doc_id));
    }
    assert_eq!(seen, vec!["b", "a"]);
    assert_eq!(cursor, store.latest_sequence().unwrap());
}

#[test]
fn test_feed_with_docs_and_conflicts() {
    let store = TestStore::new();
    replicate(&store, "doc", &["2-a", "1-root"]);
    replicate(&store, "doc", &["2-b", "1-root"]);

    let changes = store
        .changes_since(
            0,
            &ChangesOptions {
                include_docs: true,
                include_conflicts: true,
                ..ChangesOptions::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(changes.len(), 2);
    for change in &changes {
        let body = change.body.as_ref().unwrap();
        assert_eq!(body["leaf"], json!(change.rev_id.to_string()));
    }
}

#[test]
fn test_named_filter_without_body() {
    struct EvenSequences;

    impl crate::store::ChangeFilter for EvenSequences {
        fn accept(&self, revision: &Revision) -> bool {
            revision.body.is_none() && revision.sequence.is_some_and(|seq| seq % 2 == 0)
        }

        fn requires_body(&self) -> bool {
            false
        }
    }

    let store = TestStore::new();
    for i in 0..4 {
        create(&store, &format!("doc-{i}"), json!({}));
    }
    store.define_filter("even", Some(Arc::new(EvenSequences)));
    let filter = store.filter("even").unwrap();
    let changes = store
        .changes_since(0, &ChangesOptions::default(), Some(filter.as_ref()))
        .unwrap();
    let seqs: Vec<_> = changes.iter().filter_map(|rev| rev.sequence).collect();
    assert_eq!(seqs, vec![2, 4]);

    store.define_filter("even", None);
    assert!(store.filter("even").is_none());
}

#[tokio::test]
async fn test_subscribers_see_commits_in_order() {
    let store = TestStore::new();
    let stream = store.subscribe().into_stream();

    let first = create(&store, "doc", json!({"v": 1}));
    update(&store, &first, json!({"v": 2}));
    replicate(&store, "other", &["1-x"]);

    let changes: Vec<DatabaseChange> = tokio::time::timeout(
        Duration::from_secs(1),
        stream.take(3).collect(),
    )
    .await
    .unwrap();
    let seqs: Vec<_> = changes.iter().map(|change| change.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(changes.iter().all(DatabaseChange::is_winner));
    assert_eq!(changes[2].source.as_deref(), Some("http://peer/db"));
}

#[tokio::test]
async fn test_conflict_shows_in_events() {
    let store = TestStore::new();
    let mut receiver = store.subscribe();
    replicate(&store, "doc", &["2-b", "1-root"]);
    replicate(&store, "doc", &["2-a", "1-root"]);

    let first = receiver.recv().await.unwrap();
    assert!(!first.in_conflict());
    let second = receiver.recv().await.unwrap();
    assert!(second.in_conflict());
    assert!(!second.is_winner());
}

#[tokio::test]
async fn test_cached_handle_follows_changes() {
    let store = TestStore::new();
    let first = create(&store, "doc", json!({}));
    let handle = store.document("doc").unwrap();
    assert_eq!(handle.current_rev_id(), Some(first.rev_id.clone()));

    let second = update(&store, &first, json!({"v": 2}));
    assert_eq!(handle.current_rev_id(), Some(second.rev_id));
    assert!(!handle.is_deleted());
}
