pub mod attachment;
pub mod change;
pub mod ids;
pub mod revision;

pub use attachment::{Attachment, AttachmentEncoding};
pub use change::DatabaseChange;
pub use ids::{
    DESIGN_PREFIX, LOCAL_PREFIX, RevId, RevIdError, Sequence, generate_document_id,
    is_valid_document_id,
};
pub use revision::{Body, DocumentEdit, KNOWN_SPECIAL_KEYS, Revision, WinningRevision};
