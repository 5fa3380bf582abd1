//! Data models
//!
//! Items own their creators, tags, notes, attachments and annotations. All of
//! them serialize with serde; the store persists items as JSON documents.

pub mod annotation;
pub mod change;
pub mod item;

pub use annotation::{Annotation, AnnotationDraft, AnnotationEdit, AnnotationType};
pub use change::{ChangeCategory, ChangeMarkers, ChangeOrigin};
pub use item::{Creator, CreatorName, Field, Item, Note, SyncState, Tag, TagType};

/// Alphabet for object keys; omits characters that are easy to misread
const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

/// Length of generated object keys
pub const KEY_LENGTH: usize = 8;

/// Generate a random 8-character object key
pub fn generate_key() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    bytes[..KEY_LENGTH]
        .iter()
        .map(|b| KEY_ALPHABET[*b as usize % KEY_ALPHABET.len()] as char)
        .collect()
}
