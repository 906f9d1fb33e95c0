//! Validation and change-filter callbacks.
//!
//! Both are registered by name on the store. Plain closures implement the
//! traits, so most callers never name them:
//!
//! ```ignore
//! store.define_validation("no-empty", Arc::new(|rev: &Revision, _: Option<&Revision>, _: &ValidationContext<'_>| {
//!     if rev.body.as_ref().is_some_and(|b| b.is_empty()) {
//!         Verdict::reject("empty documents are not allowed")
//!     } else {
//!         Verdict::Accept
//!     }
//! }));
//! ```
//!
//! Callbacks run while the store's write lock is held and must not call
//! back into the store.

use std::collections::BTreeSet;

use crate::types::{Body, Revision};

/// Outcome of a validation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Reject with a message reported as `Forbidden`.
    Reject(String),
}

impl Verdict {
    /// Reject with `message`.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self::Reject(message.into())
    }
}

/// Message used when a validator rejects without saying why.
pub const DEFAULT_REJECTION: &str = "invalid document";

/// What a validator may inspect besides the two revisions.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    candidate: &'a Revision,
    previous: Option<&'a Revision>,
}

impl<'a> ValidationContext<'a> {
    pub(crate) const fn new(candidate: &'a Revision, previous: Option<&'a Revision>) -> Self {
        Self {
            candidate,
            previous,
        }
    }

    /// Whether the candidate creates the document.
    #[must_use]
    pub const fn is_new_document(&self) -> bool {
        self.previous.is_none()
    }

    /// Top-level properties whose value differs between the previous
    /// revision and the candidate (added, removed or changed).
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Clone needed for the owned result
    pub fn changed_keys(&self) -> BTreeSet<String> {
        let empty = Body::new();
        let old = self
            .previous
            .and_then(|rev| rev.body.as_ref())
            .unwrap_or(&empty);
        let new = self.candidate.body.as_ref().unwrap_or(&empty);

        old.keys()
            .chain(new.keys())
            .filter(|key| old.get(*key) != new.get(*key))
            .cloned()
            .collect()
    }
}

/// A named predicate run before a local revision is stored.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        candidate: &Revision,
        previous: Option<&Revision>,
        context: &ValidationContext<'_>,
    ) -> Verdict;
}

impl<F> Validator for F
where
    F: Fn(&Revision, Option<&Revision>, &ValidationContext<'_>) -> Verdict + Send + Sync,
{
    fn validate(
        &self,
        candidate: &Revision,
        previous: Option<&Revision>,
        context: &ValidationContext<'_>,
    ) -> Verdict {
        self(candidate, previous, context)
    }
}

/// A named predicate deciding whether a revision appears in a change feed.
pub trait ChangeFilter: Send + Sync {
    fn accept(&self, revision: &Revision) -> bool;

    /// Whether the filter reads the body. When `false` the feed skips
    /// loading bodies for filtering.
    fn requires_body(&self) -> bool {
        true
    }
}

impl<F> ChangeFilter for F
where
    F: Fn(&Revision) -> bool + Send + Sync,
{
    fn accept(&self, revision: &Revision) -> bool {
        self(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rev(body: serde_json::Value) -> Revision {
        let Some(body) = body.as_object().cloned() else {
            panic!("expected object");
        };
        Revision::new("doc", "1-a".parse().unwrap(), false).with_body(body)
    }

    #[test]
    fn test_changed_keys() {
        let old = rev(json!({"a": 1, "b": 2, "c": 3}));
        let new = rev(json!({"a": 1, "b": 5, "d": 4}));
        let context = ValidationContext::new(&new, Some(&old));
        let changed: Vec<_> = context.changed_keys().into_iter().collect();
        assert_eq!(changed, vec!["b", "c", "d"]);
        assert!(!context.is_new_document());
    }

    #[test]
    fn test_closure_validator() {
        let validator = |candidate: &Revision, _: Option<&Revision>, _: &ValidationContext<'_>| {
            if candidate.property("ok").is_some() {
                Verdict::Accept
            } else {
                Verdict::reject("missing ok")
            }
        };
        let good = rev(json!({"ok": true}));
        let bad = rev(json!({}));
        let ctx = ValidationContext::new(&good, None);
        assert_eq!(validator.validate(&good, None, &ctx), Verdict::Accept);
        let ctx = ValidationContext::new(&bad, None);
        assert_eq!(
            validator.validate(&bad, None, &ctx),
            Verdict::Reject("missing ok".to_string())
        );
    }

    #[test]
    fn test_closure_filter() {
        let filter = |r: &Revision| r.property("keep") == Some(&json!(true));
        assert!(filter.accept(&rev(json!({"keep": true}))));
        assert!(!filter.accept(&rev(json!({}))));
        assert!(filter.requires_body());
    }
}
