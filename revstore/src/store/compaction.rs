//! Compaction of a document store.
//!
//! Compaction drops the bodies of revisions that are no longer leaves,
//! removes their attachment rows, deletes blobs nothing references and
//! rewrites the commit log from the live tables.
//!
//! # Design
//!
//! The background task holds a `Weak<DocumentStore>`:
//! - The store owns the `Notify` that wakes the task
//! - When the store is dropped, `Weak::upgrade()` returns `None` and the task exits

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use crate::store::{DocumentStore, StoreError};
use crate::types::Sequence;

/// Configuration of the background compaction task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Also compact on this period, not only when requested.
    pub interval: Option<Duration>,
}

/// What one compaction removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub bodies_pruned: usize,
    pub attachment_rows_removed: usize,
    pub blobs_deleted: usize,
    pub log_bytes_before: u64,
    pub log_bytes_after: u64,
}

impl DocumentStore {
    /// Compact the store.
    ///
    /// Leaves keep their bodies and attachments; every other revision keeps
    /// only its id and parent link. Sequences are unaffected.
    ///
    /// # Errors
    ///
    /// Returns an error if the pruning cannot be committed, the blob store
    /// cannot be swept or the commit log cannot be rewritten.
    pub fn compact(&self) -> Result<CompactionReport, StoreError> {
        let mut db = self.write()?;
        let log_bytes_before = db.log_len();

        let (bodies_pruned, attachment_rows_removed) =
            db.run_in_transaction(|db| -> Result<_, StoreError> {
                let stale: Vec<(Sequence, bool)> = db
                    .all_revisions()
                    .filter(|row| !row.current)
                    .map(|row| (row.sequence, row.body.is_some()))
                    .collect();
                let mut bodies = 0;
                let mut attachments = 0;
                for (sequence, has_body) in stale {
                    if has_body {
                        db.set_body(sequence, None)?;
                        bodies += 1;
                    }
                    #[allow(clippy::disallowed_methods)] // Clone needed: rows are deleted below
                    let names: Vec<String> =
                        db.attachments_of(sequence).map(|row| row.name.clone()).collect();
                    for name in names {
                        db.delete_attachment(sequence, &name)?;
                        attachments += 1;
                    }
                }
                Ok((bodies, attachments))
            })?;

        let blobs_deleted = self.sweep_blobs(&db)?;
        db.compact_log()?;

        let report = CompactionReport {
            bodies_pruned,
            attachment_rows_removed,
            blobs_deleted,
            log_bytes_before,
            log_bytes_after: db.log_len(),
        };
        tracing::info!(
            bodies_pruned,
            attachment_rows_removed,
            blobs_deleted,
            log_bytes_before,
            log_bytes_after = report.log_bytes_after,
            "Compacted document store"
        );
        Ok(report)
    }

    /// Wake the background compaction task, if one is running.
    pub fn request_compaction(&self) {
        self.compaction.notify_one();
    }

    /// Signal to hand to [`spawn_compaction_task`].
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn compaction_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.compaction)
    }
}

/// Spawn a background compaction task for a store.
///
/// The task compacts whenever `notify` is signalled and, if configured,
/// on every `config.interval`. It exits once the store is dropped.
pub fn spawn_compaction_task(
    store: Weak<DocumentStore>,
    notify: Arc<Notify>,
    config: CompactionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        compaction_loop(store, notify, config).await;
    })
}

async fn compaction_loop(
    store: Weak<DocumentStore>,
    notify: Arc<Notify>,
    config: CompactionConfig,
) {
    loop {
        match config.interval {
            Some(interval) => {
                tokio::select! {
                    () = notify.notified() => {}
                    () = tokio::time::sleep(interval) => {}
                }
            }
            None => notify.notified().await,
        }

        let Some(store) = store.upgrade() else {
            tracing::debug!("Document store dropped, stopping compaction task");
            break;
        };
        if let Err(e) = store.compact() {
            tracing::error!("Compaction failed: {e}");
        }
    }
}
