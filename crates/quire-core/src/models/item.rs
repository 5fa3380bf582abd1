//! Items and their owned records

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::annotation::Annotation;
use super::change::{ChangeMarkers, ChangeOrigin};
use crate::attachment::Attachment;
use crate::dates::StructuredDate;

/// A single field value of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub base_key: Option<String>,
    pub value: String,
    /// Edited locally since the last sync
    pub changed: bool,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_key: None,
            value: value.into(),
            changed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum CreatorName {
    Full { name: String },
    Separate { first: String, last: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub creator_type: String,
    pub name: CreatorName,
    pub primary: bool,
    pub order_index: usize,
}

impl Creator {
    pub fn separate(creator_type: impl Into<String>, first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            creator_type: creator_type.into(),
            name: CreatorName::Separate {
                first: first.into(),
                last: last.into(),
            },
            primary: false,
            order_index: 0,
        }
    }

    pub fn full(creator_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            creator_type: creator_type.into(),
            name: CreatorName::Full { name: name.into() },
            primary: false,
            order_index: 0,
        }
    }

    /// Name as displayed in lists
    pub fn display_name(&self) -> String {
        match &self.name {
            CreatorName::Full { name } => name.clone(),
            CreatorName::Separate { first, last } if first.is_empty() => last.clone(),
            CreatorName::Separate { first, last } => format!("{}, {}", last, first),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub key: String,
    pub text: String,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            key: super::generate_key(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagType {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub tag_type: TagType,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag_type: TagType::Manual,
        }
    }

    pub fn automatic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag_type: TagType::Automatic,
        }
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Server-side sync status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Synced,
    /// Server has a newer version that must be fetched
    Dirty,
    /// Item uses a schema newer than this client understands
    Outdated,
}

/// A synchronized domain object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub item_type: String,
    pub library_id: i64,
    pub parent_key: Option<String>,
    /// Last version confirmed by the server
    pub version: u64,
    pub fields: BTreeMap<String, Field>,
    pub creators: Vec<Creator>,
    pub tags: BTreeSet<Tag>,
    pub notes: Vec<Note>,
    pub attachments: Vec<Attachment>,
    pub annotations: Vec<Annotation>,
    pub change_markers: ChangeMarkers,
    pub change_origin: ChangeOrigin,
    pub sync_state: SyncState,
    pub deleted: bool,
    pub parsed_date: Option<StructuredDate>,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

impl Item {
    /// New empty item with a generated key
    pub fn new(item_type: impl Into<String>, library_id: i64) -> Self {
        Self::with_key(super::generate_key(), item_type, library_id)
    }

    pub fn with_key(key: impl Into<String>, item_type: impl Into<String>, library_id: i64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            item_type: item_type.into(),
            library_id,
            parent_key: None,
            version: 0,
            fields: BTreeMap::new(),
            creators: Vec::new(),
            tags: BTreeSet::new(),
            notes: Vec::new(),
            attachments: Vec::new(),
            annotations: Vec::new(),
            change_markers: ChangeMarkers::new(),
            change_origin: ChangeOrigin::User,
            sync_state: SyncState::Synced,
            deleted: false,
            parsed_date: None,
            date_added: now,
            date_modified: now,
        }
    }

    /// Builder-style field setter for constructing items
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let field = Field::new(key, value);
        self.fields.insert(field.key.clone(), field);
        self
    }

    pub fn field_value(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|field| field.value.as_str())
    }

    /// Value of the `title` field or of the field based on it
    pub fn title(&self) -> Option<&str> {
        self.field_value("title").or_else(|| {
            self.fields
                .values()
                .find(|field| field.base_key.as_deref() == Some("title"))
                .map(|field| field.value.as_str())
        })
    }

    pub fn attachment_index(&self, attachment_key: &str) -> Option<usize> {
        self.attachments
            .iter()
            .position(|attachment| attachment.key == attachment_key)
    }

    pub fn annotation_index(&self, annotation_key: &str) -> Option<usize> {
        self.annotations
            .iter()
            .position(|annotation| annotation.key == annotation_key)
    }

    /// Whether the item has edits the sync layer hasn't uploaded yet
    pub fn has_local_changes(&self) -> bool {
        !self.change_markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_clean() {
        let item = Item::new("book", 1);
        assert_eq!(item.key.len(), super::super::KEY_LENGTH);
        assert!(!item.has_local_changes());
        assert_eq!(item.version, 0);
        assert!(!item.deleted);
    }

    #[test]
    fn test_title_falls_back_to_base_field() {
        let mut item = Item::new("case", 1);
        let mut case_name = Field::new("caseName", "Roe v. Wade");
        case_name.base_key = Some("title".to_string());
        item.fields.insert(case_name.key.clone(), case_name);

        assert_eq!(item.title(), Some("Roe v. Wade"));

        let item = Item::new("book", 1).field("title", "Dune");
        assert_eq!(item.title(), Some("Dune"));
    }

    #[test]
    fn test_creator_display_name() {
        assert_eq!(
            Creator::separate("author", "Frank", "Herbert").display_name(),
            "Herbert, Frank"
        );
        assert_eq!(Creator::separate("author", "", "Plato").display_name(), "Plato");
        assert_eq!(Creator::full("editor", "WHO").display_name(), "WHO");
    }

    #[test]
    fn test_tags_are_a_set() {
        let mut item = Item::new("book", 1);
        item.tags.insert(Tag::new("rust"));
        item.tags.insert(Tag::new("rust"));
        item.tags.insert(Tag::automatic("rust"));
        assert_eq!(item.tags.len(), 2);
    }

    #[test]
    fn test_item_serialization() {
        let mut item = Item::new("book", 1).field("title", "Dune");
        item.creators.push(Creator::separate("author", "Frank", "Herbert"));
        item.tags.insert("scifi".into());
        item.notes.push(Note::new("<p>Spice</p>"));

        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}
