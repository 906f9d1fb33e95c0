//! Identifier types for documents and revisions.
//!
//! Document ids are plain strings validated by [`is_valid_document_id`].
//! Revision ids carry a generation number and an opaque suffix and are
//! represented by [`RevId`], whose ordering is the one used for winner
//! selection on every replica.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Global, monotonically increasing revision sequence number.
///
/// Zero is never assigned; it marks "no sequence" in parent pointers of
/// tree roots and as the cursor that precedes every change.
pub type Sequence = u64;

/// Prefix of design documents (hosts view, filter and validation source).
pub const DESIGN_PREFIX: &str = "_design/";

/// Prefix of non-versioned local documents.
pub const LOCAL_PREFIX: &str = "_local/";

/// Check whether `id` may name a revisioned document.
///
/// An id must be non-empty and must not start with `_` unless it is a
/// design document. `_local/` ids belong to the local side channel and
/// are rejected here.
#[must_use]
pub fn is_valid_document_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if id.starts_with('_') {
        return id.starts_with(DESIGN_PREFIX);
    }
    true
}

/// Generate a fresh random document id (32 lowercase hex characters).
#[must_use]
pub fn generate_document_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex_string(&bytes)
}

/// Lowercase hex encoding used for generated ids and revision digests.
#[must_use]
pub fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A revision identifier of the form `<generation>-<suffix>`.
///
/// # Invariants
///
/// - `generation >= 1`
/// - `suffix` is non-empty
///
/// The derived ordering compares the numeric generation first and then the
/// suffix lexically, so `10-a` sorts after `9-z`. Field order matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevId {
    generation: u64,
    suffix: String,
}

impl RevId {
    /// Create a revision id from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `generation` is zero or `suffix` is empty.
    pub fn new(generation: u64, suffix: impl Into<String>) -> Result<Self, RevIdError> {
        let suffix = suffix.into();
        if generation == 0 {
            return Err(RevIdError::ZeroGeneration);
        }
        if suffix.is_empty() {
            return Err(RevIdError::EmptySuffix);
        }
        Ok(Self { generation, suffix })
    }

    /// The numeric generation (1 for a root revision).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The opaque suffix after the dash.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Generation of a child of this revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the generation is already `u64::MAX`.
    pub const fn next_generation(&self) -> Result<u64, RevIdError> {
        match self.generation.checked_add(1) {
            Some(next) => Ok(next),
            None => Err(RevIdError::GenerationOverflow),
        }
    }

    /// The tag of a local document at the given generation (`N-local`).
    #[must_use]
    pub fn local(generation: u64) -> Self {
        Self {
            generation: generation.max(1),
            suffix: "local".to_string(),
        }
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.suffix)
    }
}

impl FromStr for RevId {
    type Err = RevIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, suffix) = s.split_once('-').ok_or(RevIdError::MissingDash)?;
        // Canonical decimal only, so parsing and printing round-trip.
        if !generation.bytes().all(|b| b.is_ascii_digit())
            || (generation.len() > 1 && generation.starts_with('0'))
        {
            return Err(RevIdError::InvalidGeneration(generation.to_string()));
        }
        let generation = generation
            .parse::<u64>()
            .map_err(|_| RevIdError::InvalidGeneration(generation.to_string()))?;
        Self::new(generation, suffix)
    }
}

impl TryFrom<String> for RevId {
    type Error = RevIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RevId> for String {
    fn from(id: RevId) -> Self {
        id.to_string()
    }
}

/// Order two revision ids descending, the order winners are picked in.
#[must_use]
pub fn descending(a: &RevId, b: &RevId) -> Ordering {
    b.cmp(a)
}

/// Errors produced when parsing a revision id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevIdError {
    /// No `-` separates the generation from the suffix.
    MissingDash,
    /// The generation is not a number.
    InvalidGeneration(String),
    /// The generation is zero.
    ZeroGeneration,
    /// Nothing follows the dash.
    EmptySuffix,
    /// A child generation would not fit in a `u64`.
    GenerationOverflow,
}

impl fmt::Display for RevIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDash => write!(f, "revision id has no '-' separator"),
            Self::InvalidGeneration(g) => write!(f, "invalid revision generation '{g}'"),
            Self::ZeroGeneration => write!(f, "revision generation must be positive"),
            Self::EmptySuffix => write!(f, "revision id suffix is empty"),
            Self::GenerationOverflow => write!(f, "revision generation is at its maximum"),
        }
    }
}

impl std::error::Error for RevIdError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    #[test]
    fn test_valid_document_ids() {
        assert!(is_valid_document_id("a"));
        assert!(is_valid_document_id("_design/views"));
        assert!(!is_valid_document_id(""));
        assert!(!is_valid_document_id("_local/x"));
        assert!(!is_valid_document_id("_private"));
    }

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = generate_document_id();
        let b = generate_document_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(is_valid_document_id(&a));
    }

    #[test]
    fn test_parse_rev_id() {
        let id = rev("12-abcdef");
        assert_eq!(id.generation(), 12);
        assert_eq!(id.suffix(), "abcdef");
        assert_eq!(id.to_string(), "12-abcdef");
    }

    #[test]
    fn test_parse_rev_id_suffix_may_contain_dash() {
        let id = rev("3-a-b");
        assert_eq!(id.generation(), 3);
        assert_eq!(id.suffix(), "a-b");
    }

    #[test]
    fn test_parse_rev_id_errors() {
        assert_eq!("abc".parse::<RevId>(), Err(RevIdError::MissingDash));
        assert_eq!("0-abc".parse::<RevId>(), Err(RevIdError::ZeroGeneration));
        assert_eq!("2-".parse::<RevId>(), Err(RevIdError::EmptySuffix));
        assert!(matches!(
            "x-abc".parse::<RevId>(),
            Err(RevIdError::InvalidGeneration(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_canonical_generation() {
        for input in ["01-abc", "+1-abc", "00-abc", "-abc", " 1-abc"] {
            assert!(
                matches!(input.parse::<RevId>(), Err(RevIdError::InvalidGeneration(_))),
                "{input} should be rejected"
            );
        }
        assert_eq!(rev("10-abc").to_string(), "10-abc");
    }

    #[test]
    fn test_next_generation_at_maximum() {
        assert_eq!(rev("4-a").next_generation(), Ok(5));
        let top = RevId::new(u64::MAX, "x").unwrap();
        assert_eq!(top.to_string().parse::<RevId>(), Ok(top.clone()));
        assert_eq!(top.next_generation(), Err(RevIdError::GenerationOverflow));
    }

    #[test]
    fn test_generation_compares_numerically() {
        assert!(rev("10-a") > rev("9-z"));
        assert!(rev("2-b") > rev("2-a"));
        assert_eq!(descending(&rev("1-a"), &rev("2-a")), Ordering::Greater);
    }

    #[test]
    fn test_rev_id_serde_as_string() {
        let id = rev("4-ff");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"4-ff\"");
        let back: RevId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RevId>("\"nope\"").is_err());
    }

    #[test]
    fn test_local_tag() {
        assert_eq!(RevId::local(1).to_string(), "1-local");
        assert_eq!(RevId::local(0).to_string(), "1-local");
    }
}
