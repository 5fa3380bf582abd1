//! Change classification
//!
//! Compares two states of an item property by property. A write is cosmetic
//! when the differing properties are exactly the sync bookkeeping triple
//! (version, change origin, change markers): the server confirmed a version
//! and nothing else happened. Every other difference is substantive,
//! including a write that changes nothing or only part of the triple.
//!
//! Per-field `changed` flags are the field-level half of the change markers,
//! so they count towards [`ItemProperty::ChangeMarkers`], not `Fields`.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::models::Item;

/// Top-level properties of an [`Item`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemProperty {
    ItemType,
    LibraryId,
    ParentKey,
    Version,
    Fields,
    Creators,
    Tags,
    Notes,
    Attachments,
    Annotations,
    ChangeMarkers,
    ChangeOrigin,
    SyncState,
    Deleted,
    ParsedDate,
    DateAdded,
    DateModified,
}

/// The only property set that makes a write cosmetic
pub const COSMETIC_PROPERTIES: [ItemProperty; 3] = [
    ItemProperty::Version,
    ItemProperty::ChangeOrigin,
    ItemProperty::ChangeMarkers,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    Substantive,
    Cosmetic,
}

impl Classification {
    pub fn is_cosmetic(self) -> bool {
        self == Classification::Cosmetic
    }
}

/// Properties whose values differ between `prior` and `new`
pub fn changed_properties(prior: &Item, new: &Item) -> BTreeSet<ItemProperty> {
    let mut changed = BTreeSet::new();
    let mut check = |differs: bool, property: ItemProperty| {
        if differs {
            changed.insert(property);
        }
    };

    check(prior.item_type != new.item_type, ItemProperty::ItemType);
    check(prior.library_id != new.library_id, ItemProperty::LibraryId);
    check(prior.parent_key != new.parent_key, ItemProperty::ParentKey);
    check(prior.version != new.version, ItemProperty::Version);
    check(field_values_differ(prior, new), ItemProperty::Fields);
    check(prior.creators != new.creators, ItemProperty::Creators);
    check(prior.tags != new.tags, ItemProperty::Tags);
    check(prior.notes != new.notes, ItemProperty::Notes);
    check(prior.attachments != new.attachments, ItemProperty::Attachments);
    check(prior.annotations != new.annotations, ItemProperty::Annotations);
    check(
        prior.change_markers != new.change_markers || field_flags_differ(prior, new),
        ItemProperty::ChangeMarkers,
    );
    check(prior.change_origin != new.change_origin, ItemProperty::ChangeOrigin);
    check(prior.sync_state != new.sync_state, ItemProperty::SyncState);
    check(prior.deleted != new.deleted, ItemProperty::Deleted);
    check(prior.parsed_date != new.parsed_date, ItemProperty::ParsedDate);
    check(prior.date_added != new.date_added, ItemProperty::DateAdded);
    check(prior.date_modified != new.date_modified, ItemProperty::DateModified);

    changed
}

fn field_values_differ(prior: &Item, new: &Item) -> bool {
    prior.fields.len() != new.fields.len()
        || prior.fields.iter().zip(new.fields.iter()).any(|((k1, f1), (k2, f2))| {
            k1 != k2 || f1.base_key != f2.base_key || f1.value != f2.value
        })
}

fn field_flags_differ(prior: &Item, new: &Item) -> bool {
    prior.fields.iter().any(|(key, field)| {
        new.fields
            .get(key)
            .map_or(false, |other| other.changed != field.changed)
    })
}

/// Classify the write that turned `prior` into `new`
pub fn classify(prior: &Item, new: &Item) -> Classification {
    classify_properties(&changed_properties(prior, new))
}

pub fn classify_properties(changed: &BTreeSet<ItemProperty>) -> Classification {
    let cosmetic: BTreeSet<ItemProperty> = COSMETIC_PROPERTIES.into_iter().collect();
    if *changed == cosmetic {
        Classification::Cosmetic
    } else {
        Classification::Substantive
    }
}

/// Fine-grained description of what a write touched, for targeted redraws
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemChange {
    Created,
    ItemType,
    Field { key: String },
    Creators,
    Tags,
    Notes,
    Parent,
    Trashed,
    /// Attachment at `index` (in the new list) was added or changed
    Attachment { index: usize, key: String },
    AttachmentRemoved { key: String },
    AttachmentsReordered,
    /// Annotation at `index` (in the new list) was added or changed
    Annotation { index: usize, key: String },
    AnnotationRemoved { key: String },
    /// Version, origin, markers or sync state
    SyncMetadata,
}

/// List the changes between two states of one item
pub fn item_changes(prior: &Item, new: &Item) -> Vec<ItemChange> {
    let mut changes = Vec::new();

    if prior.item_type != new.item_type {
        changes.push(ItemChange::ItemType);
    }

    let keys: BTreeSet<&String> = prior.fields.keys().chain(new.fields.keys()).collect();
    for key in keys {
        let before = prior.fields.get(key).map(|field| &field.value);
        let after = new.fields.get(key).map(|field| &field.value);
        if before != after {
            changes.push(ItemChange::Field { key: key.clone() });
        }
    }

    if prior.creators != new.creators {
        changes.push(ItemChange::Creators);
    }
    if prior.tags != new.tags {
        changes.push(ItemChange::Tags);
    }
    if prior.notes != new.notes {
        changes.push(ItemChange::Notes);
    }
    if prior.parent_key != new.parent_key {
        changes.push(ItemChange::Parent);
    }
    if prior.deleted != new.deleted {
        changes.push(ItemChange::Trashed);
    }

    diff_keyed(
        &prior.attachments,
        &new.attachments,
        |attachment| attachment.key.as_str(),
        &mut changes,
        |index, key| ItemChange::Attachment { index, key },
        |key| ItemChange::AttachmentRemoved { key },
        Some(ItemChange::AttachmentsReordered),
    );
    diff_keyed(
        &prior.annotations,
        &new.annotations,
        |annotation| annotation.key.as_str(),
        &mut changes,
        |index, key| ItemChange::Annotation { index, key },
        |key| ItemChange::AnnotationRemoved { key },
        None,
    );

    if prior.version != new.version
        || prior.change_origin != new.change_origin
        || prior.change_markers != new.change_markers
        || prior.sync_state != new.sync_state
    {
        changes.push(ItemChange::SyncMetadata);
    }

    changes
}

fn diff_keyed<T: PartialEq>(
    prior: &[T],
    new: &[T],
    key_of: impl Fn(&T) -> &str,
    changes: &mut Vec<ItemChange>,
    changed: impl Fn(usize, String) -> ItemChange,
    removed: impl Fn(String) -> ItemChange,
    reordered: Option<ItemChange>,
) {
    let before: HashMap<&str, (usize, &T)> = prior
        .iter()
        .enumerate()
        .map(|(index, value)| (key_of(value), (index, value)))
        .collect();
    let after: HashMap<&str, &T> = new.iter().map(|value| (key_of(value), value)).collect();

    let mut moved = false;
    for (index, value) in new.iter().enumerate() {
        match before.get(key_of(value)) {
            Some((old_index, old)) => {
                if *old != value {
                    changes.push(changed(index, key_of(value).to_string()));
                }
                moved |= *old_index != index;
            }
            None => changes.push(changed(index, key_of(value).to_string())),
        }
    }
    for value in prior {
        if !after.contains_key(key_of(value)) {
            changes.push(removed(key_of(value).to_string()));
        }
    }
    if moved && prior.len() == new.len() {
        if let Some(reordered) = reordered {
            changes.push(reordered);
        }
    }
}
