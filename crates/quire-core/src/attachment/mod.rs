//! Attachments and their file availability
//!
//! An attachment's persisted `location` says where its payload lives. It is
//! private to this module tree: only the state machine in [`lifecycle`]
//! changes it, so every location change goes through a checked transition.

pub mod lifecycle;
pub mod worker;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::Item;

pub use lifecycle::{AttachmentLifecycle, CancellationToken, LocationEvent, Transition};
pub use worker::{run_extraction, ExtractionJob, ExtractionResult, ExtractionWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkType {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    EmbeddedImage,
}

/// What the attachment points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttachmentContent {
    File { path: PathBuf, link_type: LinkType },
    /// Web page snapshot, downloaded as a zip and unpacked next to `html_path`
    Snapshot { html_path: PathBuf, zip_path: PathBuf },
    Url { url: String },
}

/// Persisted payload location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentLocation {
    Local,
    Remote,
    /// Expected locally but the file is gone
    Missing,
}

/// Location combined with in-flight transfer state
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentState {
    Local,
    Remote,
    Downloading { progress: f64 },
    Failed(StoreError),
    Missing,
}

impl AttachmentState {
    pub fn name(&self) -> &'static str {
        match self {
            AttachmentState::Local => "local",
            AttachmentState::Remote => "remote",
            AttachmentState::Downloading { .. } => "downloading",
            AttachmentState::Failed(_) => "failed",
            AttachmentState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    pub title: String,
    pub content: AttachmentContent,
    location: AttachmentLocation,
}

impl Attachment {
    /// Attachment known from the server; file payloads start out remote
    pub fn new(key: impl Into<String>, title: impl Into<String>, content: AttachmentContent) -> Self {
        let location = match content {
            AttachmentContent::Url { .. } => AttachmentLocation::Local,
            AttachmentContent::File {
                link_type: LinkType::LinkedFile,
                ..
            } => AttachmentLocation::Local,
            _ => AttachmentLocation::Remote,
        };
        Self {
            key: key.into(),
            title: title.into(),
            content,
            location,
        }
    }

    pub fn location(&self) -> AttachmentLocation {
        self.location
    }

    /// File the user opens, if the attachment has one
    pub fn file_path(&self) -> Option<&Path> {
        match &self.content {
            AttachmentContent::File { path, .. } => Some(path),
            AttachmentContent::Snapshot { html_path, .. } => Some(html_path),
            AttachmentContent::Url { .. } => None,
        }
    }

    /// Whether the payload lives in managed storage and can be downloaded
    pub fn is_downloadable(&self) -> bool {
        match &self.content {
            AttachmentContent::File { link_type, .. } => *link_type != LinkType::LinkedFile,
            AttachmentContent::Snapshot { .. } => true,
            AttachmentContent::Url { .. } => false,
        }
    }
}

/// File to copy into storage as a new attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentImport {
    pub title: String,
    pub source: PathBuf,
}

impl AttachmentImport {
    pub fn new(title: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
        }
    }
}

/// Notification that attachment files were deleted from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentFileDeleted {
    Individual {
        key: String,
        parent_key: Option<String>,
        library_id: i64,
    },
    Library(i64),
    All,
}

impl AttachmentFileDeleted {
    /// Whether `attachment` of `item` falls under this deletion
    pub fn covers(&self, item: &Item, attachment: &Attachment) -> bool {
        match self {
            AttachmentFileDeleted::Individual {
                key,
                parent_key,
                library_id,
            } => {
                attachment.key == *key
                    && item.library_id == *library_id
                    && parent_key.as_deref().map_or(true, |parent| parent == item.key)
            }
            AttachmentFileDeleted::Library(library_id) => item.library_id == *library_id,
            AttachmentFileDeleted::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(key: &str) -> Attachment {
        Attachment::new(
            key,
            format!("{}.pdf", key),
            AttachmentContent::File {
                path: PathBuf::from(format!("/storage/{}/{}.pdf", key, key)),
                link_type: LinkType::ImportedFile,
            },
        )
    }

    #[test]
    fn test_initial_locations() {
        assert_eq!(pdf("AAAA2222").location(), AttachmentLocation::Remote);

        let url = Attachment::new(
            "BBBB2222",
            "Homepage",
            AttachmentContent::Url {
                url: "https://example.com".into(),
            },
        );
        assert_eq!(url.location(), AttachmentLocation::Local);
        assert!(!url.is_downloadable());
        assert!(url.file_path().is_none());

        let linked = Attachment::new(
            "CCCC2222",
            "Linked",
            AttachmentContent::File {
                path: PathBuf::from("/home/me/paper.pdf"),
                link_type: LinkType::LinkedFile,
            },
        );
        assert_eq!(linked.location(), AttachmentLocation::Local);
        assert!(!linked.is_downloadable());
    }

    #[test]
    fn test_deletion_scopes() {
        let mut item = Item::with_key("ITEM2222", "book", 1);
        item.attachments.push(pdf("AAAA2222"));
        item.attachments.push(pdf("BBBB2222"));

        let individual = AttachmentFileDeleted::Individual {
            key: "AAAA2222".into(),
            parent_key: Some("ITEM2222".into()),
            library_id: 1,
        };
        assert!(individual.covers(&item, &item.attachments[0]));
        assert!(!individual.covers(&item, &item.attachments[1]));

        let wrong_parent = AttachmentFileDeleted::Individual {
            key: "AAAA2222".into(),
            parent_key: Some("OTHER222".into()),
            library_id: 1,
        };
        assert!(!wrong_parent.covers(&item, &item.attachments[0]));

        assert!(AttachmentFileDeleted::Library(1).covers(&item, &item.attachments[1]));
        assert!(!AttachmentFileDeleted::Library(2).covers(&item, &item.attachments[1]));
        assert!(AttachmentFileDeleted::All.covers(&item, &item.attachments[0]));
    }

    #[test]
    fn test_location_survives_serialization() {
        let attachment = pdf("AAAA2222");
        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains(r#""location":"remote""#));
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attachment);
    }
}
