//! Body encoding and revision id computation.

use sha1::{Digest, Sha1};

use crate::store::StoreError;
use crate::types::ids::hex_string;
use crate::types::revision::is_known_special_key;
use crate::types::{Body, RevId};

/// Serialize `body` for storage, dropping every `_` property.
///
/// # Errors
///
/// Returns `BadRequest` if the body has an unknown `_` property.
pub(crate) fn encode_body(body: &Body) -> Result<String, StoreError> {
    let mut stripped = Body::new();
    for (key, value) in body {
        if key.starts_with('_') {
            if !is_known_special_key(key) {
                return Err(StoreError::bad_request(format!(
                    "unknown special property '{key}'"
                )));
            }
            continue;
        }
        #[allow(clippy::disallowed_methods)] // Clone needed to build the stored body
        stripped.insert(key.clone(), value.clone());
    }
    Ok(serde_json::to_string(&stripped)?)
}

/// Parse a stored body.
pub(crate) fn decode_body(json: &str) -> Result<Body, StoreError> {
    Ok(serde_json::from_str(json)?)
}

/// Compute the id of a new local revision.
///
/// The id is `<parent generation + 1>-<hex sha1>` over the parent id, the
/// deletion flag, the stored body and the attachment digests, so the same
/// edit applied to the same parent yields the same id on every replica.
pub(crate) fn compute_rev_id(
    parent: Option<&RevId>,
    deleted: bool,
    encoded_body: Option<&str>,
    attachment_digests: &[(String, String)],
) -> Result<RevId, StoreError> {
    let mut hasher = Sha1::new();
    if let Some(parent) = parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hasher.update([0, u8::from(deleted)]);
    if let Some(body) = encoded_body {
        hasher.update(body.as_bytes());
    }
    for (name, digest) in attachment_digests {
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(digest.as_bytes());
    }
    let generation = parent.map_or(Ok(1), RevId::next_generation)?;
    Ok(RevId::new(generation, hex_string(&hasher.finalize()))?)
}
