//! Change notification types.

use crate::types::ids::Sequence;
use crate::types::revision::{Revision, WinningRevision};

/// Notification of a committed revision, broadcast to all subscribers.
///
/// Published once per stored revision, after the transaction that stored
/// it has committed.
#[derive(Debug, Clone)]
#[allow(clippy::disallowed_methods)] // Clone needed for broadcast channel
pub struct DatabaseChange {
    /// The revision that was added (without body).
    pub revision: Revision,
    /// Sequence assigned to the revision.
    pub sequence: Sequence,
    /// The document's winner after the change.
    pub winner: Option<WinningRevision>,
    /// Where a replicated revision came from; `None` for local edits.
    pub source: Option<String>,
}

impl DatabaseChange {
    /// Id of the changed document.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.revision.doc_id
    }

    /// Whether the added revision became the document's winner.
    #[must_use]
    pub fn is_winner(&self) -> bool {
        self.winner
            .as_ref()
            .is_some_and(|winner| winner.rev_id == self.revision.rev_id)
    }

    /// Whether the document is in conflict after the change.
    #[must_use]
    pub fn in_conflict(&self) -> bool {
        self.winner.as_ref().is_some_and(|winner| winner.conflicted)
    }
}
