//! Data model shared by every datatap crate.
//!
//! Records are ordered field maps whose values are JSON-like, plus two
//! file variants: a resolved [`FileAttachment`] or an unresolved
//! [`FileReference`] placeholder.

pub mod attachment;
pub mod domain;
pub mod error;
pub mod record;

pub use attachment::{
    AttachmentSource, FILE_TYPE_TAG, FileAttachment, FileReference, MemberSource, TYPE_KEY,
};
pub use domain::Domain;
pub use error::{Result, ShapeError};
pub use record::{Record, Value, json_kind};
