//! Attachment metadata shared by storage and the store API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer encoding of stored attachment content.
///
/// Content is stored exactly as received; an encoded attachment is never
/// decoded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentEncoding {
    /// Stored as-is.
    #[default]
    Identity,
    /// Stored gzip-compressed.
    Gzip,
}

impl AttachmentEncoding {
    /// Parse the `encoding` property of an attachment declaration.
    ///
    /// Returns `None` for encodings the store does not understand.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("identity") => Some(Self::Identity),
            Some("gzip") => Some(Self::Gzip),
            Some(_) => None,
        }
    }

    /// Name used in attachment metadata, `None` for identity.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
        }
    }
}

impl fmt::Display for AttachmentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("identity"))
    }
}

/// An attachment's content fetched from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name of the attachment within its revision.
    pub name: String,
    /// MIME type, if one was declared.
    pub content_type: Option<String>,
    /// Encoding of `data`.
    pub encoding: AttachmentEncoding,
    /// Raw stored bytes.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoding() {
        assert_eq!(AttachmentEncoding::parse(None), Some(AttachmentEncoding::Identity));
        assert_eq!(AttachmentEncoding::parse(Some("gzip")), Some(AttachmentEncoding::Gzip));
        assert_eq!(AttachmentEncoding::parse(Some("brotli")), None);
    }

    #[test]
    fn test_encoding_serde() {
        let json = serde_json::to_string(&AttachmentEncoding::Gzip).unwrap();
        assert_eq!(json, "\"gzip\"");
        assert_eq!(AttachmentEncoding::Identity.to_string(), "identity");
    }
}
