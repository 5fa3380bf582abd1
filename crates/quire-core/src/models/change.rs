//! Dirty markers and change origin

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Attribute group of an item with unsynced local edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeCategory {
    Type,
    Fields,
    Creators,
    Tags,
    Notes,
    Rects,
    Paths,
    Parent,
    AttachmentFileRemoved,
    Attachments,
    Trash,
}

/// Where the most recent write to an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOrigin {
    User,
    Sync,
}

/// Accumulated dirty markers of an item
///
/// Markers only grow between sync cycles; the store clears them when the
/// sync layer confirms an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeMarkers(BTreeSet<ChangeCategory>);

impl ChangeMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the marker was not set before
    pub fn insert(&mut self, category: ChangeCategory) -> bool {
        self.0.insert(category)
    }

    pub fn extend(&mut self, categories: impl IntoIterator<Item = ChangeCategory>) {
        self.0.extend(categories);
    }

    pub fn contains(&self, category: ChangeCategory) -> bool {
        self.0.contains(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangeCategory> + '_ {
        self.0.iter().copied()
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<ChangeCategory> for ChangeMarkers {
    fn from_iter<I: IntoIterator<Item = ChangeCategory>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
