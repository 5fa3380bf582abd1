//! Applying server state on top of local state
//!
//! The server copy wins for every category without a local change marker.
//! Marked categories keep the local values until the sync layer uploads them
//! and confirms with `MarkSynced`. Markers themselves are never added here.

use crate::attachment::AttachmentLifecycle;
use crate::models::{ChangeCategory, ChangeOrigin, Item, SyncState};

/// Merge a server copy of an item with the local one
///
/// `schema_known` is false when this client has no schema for the server's
/// item type; the result is then flagged [`SyncState::Outdated`].
pub fn merge_server_item(local: Option<&Item>, mut server: Item, schema_known: bool) -> Item {
    for field in server.fields.values_mut() {
        field.changed = false;
    }
    server.change_markers.clear();
    server.change_origin = ChangeOrigin::Sync;
    server.sync_state = if schema_known {
        SyncState::Synced
    } else {
        SyncState::Outdated
    };

    let Some(local) = local else {
        return server;
    };

    let markers = &local.change_markers;
    let mut merged = server;

    if markers.contains(ChangeCategory::Type) {
        merged.item_type = local.item_type.clone();
    }
    if markers.contains(ChangeCategory::Type) || markers.contains(ChangeCategory::Fields) {
        merged.fields = local.fields.clone();
        merged.parsed_date = local.parsed_date.clone();
    }
    if markers.contains(ChangeCategory::Creators) {
        merged.creators = local.creators.clone();
    }
    if markers.contains(ChangeCategory::Tags) {
        merged.tags = local.tags.clone();
    }
    if markers.contains(ChangeCategory::Notes) {
        merged.notes = local.notes.clone();
    }
    if markers.contains(ChangeCategory::Parent) {
        merged.parent_key = local.parent_key.clone();
    }
    if markers.contains(ChangeCategory::Trash) {
        merged.deleted = local.deleted;
    }
    if markers.contains(ChangeCategory::Rects) || markers.contains(ChangeCategory::Paths) {
        merged.annotations = local.annotations.clone();
    }
    if markers.contains(ChangeCategory::Attachments)
        || markers.contains(ChangeCategory::AttachmentFileRemoved)
    {
        merged.attachments = local.attachments.clone();
    } else {
        for attachment in &mut merged.attachments {
            if let Some(index) = local.attachment_index(&attachment.key) {
                AttachmentLifecycle::carry_over(attachment, &local.attachments[index]);
            }
        }
    }

    if !markers.is_empty() {
        // Local edits are still pending; the item keeps its local timestamp
        merged.change_markers = markers.clone();
        merged.date_modified = local.date_modified;
    }

    merged
}
