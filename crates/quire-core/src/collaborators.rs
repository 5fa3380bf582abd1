//! Interfaces to the systems the store depends on but doesn't implement
//!
//! File primitives, item schemas, date parsing and PDF page data all live
//! outside this crate. The store only sees them through these traits, bundled
//! in [`Collaborators`].

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::dates::StructuredDate;
use crate::geometry::{GlyphFrame, PageInfo};

/// File-system primitives used for attachment payloads
pub trait FileStorage: Send + Sync {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    /// Create every missing directory leading up to `path`
    fn create_directories(&self, path: &Path) -> io::Result<()>;
    fn is_archive(&self, path: &Path) -> bool;
    fn unzip(&self, archive: &Path, destination: &Path) -> io::Result<()>;
}

/// One field of an item type, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub key: String,
    /// Base field this one maps to (e.g. `publicationTitle` for `websiteTitle`)
    pub base_key: Option<String>,
}

impl FieldDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_key: None,
        }
    }

    pub fn with_base(key: impl Into<String>, base_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_key: Some(base_key.into()),
        }
    }

    /// Whether `other` stores the same information under this type's schema
    pub fn is_equivalent(&self, key: &str, base_key: Option<&str>) -> bool {
        self.key == key
            || self.base_key.as_deref() == Some(key)
            || base_key.map_or(false, |base| base == self.key || Some(base) == self.base_key.as_deref())
    }

    pub fn is_date(&self) -> bool {
        self.key == "date" || self.base_key.as_deref() == Some("date")
    }
}

/// Item type schemas
pub trait SchemaProvider: Send + Sync {
    /// Ordered fields for a type, `None` if the type is unknown
    fn fields_for_type(&self, item_type: &str) -> Option<Vec<FieldDescriptor>>;
    fn localized_label(&self, item_type: &str) -> Option<String>;
    fn localized_creator_label(&self, creator_type: &str) -> Option<String>;
}

pub trait DateParser: Send + Sync {
    fn parse(&self, value: &str) -> Option<StructuredDate>;
}

/// Page geometry and text of attachment documents
pub trait PageInfoProvider: Send + Sync {
    fn page_info(&self, document_key: &str, page: u32) -> Option<PageInfo>;
    /// Glyphs in text-flow order; empty when the page has no extractable text
    fn text_glyphs(&self, document_key: &str, page: u32) -> Vec<GlyphFrame>;
}

/// Shared handles to every external collaborator
#[derive(Clone)]
pub struct Collaborators {
    pub files: Arc<dyn FileStorage>,
    pub schema: Arc<dyn SchemaProvider>,
    pub dates: Arc<dyn DateParser>,
    pub pages: Arc<dyn PageInfoProvider>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_equivalence() {
        let website_title = FieldDescriptor::with_base("websiteTitle", "publicationTitle");

        assert!(website_title.is_equivalent("websiteTitle", None));
        assert!(website_title.is_equivalent("publicationTitle", None));
        assert!(website_title.is_equivalent("bookTitle", Some("publicationTitle")));
        assert!(!website_title.is_equivalent("publisher", None));

        let title = FieldDescriptor::new("title");
        assert!(title.is_equivalent("title", None));
        assert!(title.is_equivalent("caseName", Some("title")));
        assert!(!title.is_equivalent("abstract", None));
    }

    #[test]
    fn test_date_fields() {
        assert!(FieldDescriptor::new("date").is_date());
        assert!(FieldDescriptor::with_base("dateEnacted", "date").is_date());
        assert!(!FieldDescriptor::new("accessDate").is_date());
    }
}
