//! Edit sessions
//!
//! ```text
//! idle ──begin──► editing ──save──► saving ──► idle
//!                    │
//!                    └──cancel──► cancelled
//! ```
//!
//! `begin` snapshots the item. Edits only touch the working copy. Saving
//! diffs the working copy against the snapshot and submits one `Batch`, or
//! nothing when there is no difference. External changes that arrive while
//! editing are classified; a substantive one parks the session in conflict
//! until the caller picks [`ConflictResolution::Reload`] or
//! [`ConflictResolution::KeepEditing`]. Working-copy edits are never dropped
//! without that decision.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::classifier::{self, ItemProperty};
use crate::error::{Result, StoreError};
use crate::models::{Creator, Field, Item, Note, Tag};
use crate::store::{AppliedChange, Mutation, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Editing,
    Saving,
    Cancelled,
}

/// A substantive change made outside the session
#[derive(Debug, Clone, PartialEq)]
pub struct EditConflict {
    pub item_key: String,
    pub external: Item,
    pub changed: BTreeSet<ItemProperty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Drop local edits and continue from the external state
    Reload,
    /// Replay local edits on top of the external state
    KeepEditing,
}

#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Unchanged,
    Saved(AppliedChange),
}

pub struct EditSession {
    item_key: String,
    state: SessionState,
    snapshot: Item,
    working: Item,
    conflict: Option<EditConflict>,
    accept_dropped_fields: bool,
}

impl EditSession {
    /// Start editing the current state of `item_key`
    pub fn begin(store: &Store, item_key: &str) -> Result<Self> {
        let item = store
            .item(item_key)
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(item_key.to_string()))?;
        debug!(item = item_key, "Edit session started");
        Ok(Self {
            item_key: item_key.to_string(),
            state: SessionState::Editing,
            snapshot: item.clone(),
            working: item,
            conflict: None,
            accept_dropped_fields: false,
        })
    }

    pub fn item_key(&self) -> &str {
        &self.item_key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> &Item {
        &self.snapshot
    }

    pub fn working(&self) -> &Item {
        &self.working
    }

    pub fn conflict(&self) -> Option<&EditConflict> {
        self.conflict.as_ref()
    }

    /// Whether the working copy differs from the snapshot
    pub fn has_edits(&self) -> bool {
        !self.diff().is_empty()
    }

    // ==================== Working copy edits ====================

    pub fn set_field(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.ensure_editing()?;
        let value = value.into();
        match self.working.fields.get_mut(key) {
            Some(field) => field.value = value,
            None => {
                self.working
                    .fields
                    .insert(key.to_string(), Field::new(key, value));
            }
        }
        Ok(())
    }

    pub fn set_creators(&mut self, creators: Vec<Creator>) -> Result<()> {
        self.ensure_editing()?;
        self.working.creators = creators;
        Ok(())
    }

    pub fn set_tags(&mut self, tags: BTreeSet<Tag>) -> Result<()> {
        self.ensure_editing()?;
        self.working.tags = tags;
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Vec<Note>) -> Result<()> {
        self.ensure_editing()?;
        self.working.notes = notes;
        Ok(())
    }

    pub fn set_item_type(&mut self, item_type: impl Into<String>) -> Result<()> {
        self.ensure_editing()?;
        self.working.item_type = item_type.into();
        self.accept_dropped_fields = false;
        Ok(())
    }

    /// Confirm a type change after `DroppedFieldsOnTypeChange`
    pub fn accept_dropped_fields(&mut self) {
        self.accept_dropped_fields = true;
    }

    // ==================== External changes ====================

    /// Feed a newer committed state of the item into the session
    ///
    /// Cosmetic changes are absorbed into the snapshot. A substantive change
    /// raises a conflict, which is also returned.
    pub fn external_change(&mut self, external: &Item) -> Option<&EditConflict> {
        if self.state != SessionState::Editing || external.key != self.item_key {
            return None;
        }
        let base = self
            .conflict
            .as_ref()
            .map_or(&self.snapshot, |conflict| &conflict.external);
        let changed = classifier::changed_properties(base, external);
        if changed.is_empty() {
            return None;
        }

        if classifier::classify_properties(&changed).is_cosmetic() {
            debug!(item = %self.item_key, "Absorbed cosmetic external change");
            match &mut self.conflict {
                Some(conflict) => conflict.external = external.clone(),
                None => self.snapshot = external.clone(),
            }
            return None;
        }

        info!(item = %self.item_key, ?changed, "Item changed externally during edit");
        let changed = match self.conflict.take() {
            Some(previous) => previous.changed.union(&changed).copied().collect(),
            None => changed,
        };
        self.conflict = Some(EditConflict {
            item_key: self.item_key.clone(),
            external: external.clone(),
            changed,
        });
        self.conflict.as_ref()
    }

    pub fn resolve(&mut self, resolution: ConflictResolution) {
        let Some(conflict) = self.conflict.take() else {
            return;
        };
        match resolution {
            ConflictResolution::Reload => {
                self.working = conflict.external.clone();
                self.snapshot = conflict.external;
            }
            ConflictResolution::KeepEditing => {
                self.working = rebase(&self.snapshot, &self.working, &conflict.external);
                self.snapshot = conflict.external;
            }
        }
        debug!(item = %self.item_key, ?resolution, "Edit conflict resolved");
    }

    // ==================== Save and cancel ====================

    /// Mutation that commits the working copy, `None` if nothing changed
    ///
    /// Moves the session to `saving`; report the store's answer with
    /// [`EditSession::finish_save`].
    pub fn prepare_save(&mut self) -> Result<Option<Mutation>> {
        self.ensure_editing()?;
        if self.conflict.is_some() {
            return Err(StoreError::ConflictDuringEdit);
        }

        let mutations = self.diff();
        if mutations.is_empty() {
            debug!(item = %self.item_key, "Nothing to save");
            self.state = SessionState::Idle;
            return Ok(None);
        }
        self.state = SessionState::Saving;
        Ok(Some(Mutation::Batch { mutations }))
    }

    /// Complete a save started with `prepare_save`
    ///
    /// On failure the session returns to editing with the working copy intact.
    pub fn finish_save(&mut self, result: Result<AppliedChange>) -> Result<SaveOutcome> {
        if self.state != SessionState::Saving {
            return Err(StoreError::SessionClosed(self.item_key.clone()));
        }
        match result {
            Ok(change) => {
                self.state = SessionState::Idle;
                self.snapshot = self.working.clone();
                Ok(SaveOutcome::Saved(change))
            }
            Err(e) => {
                self.state = SessionState::Editing;
                Err(e)
            }
        }
    }

    pub fn save(&mut self, store: &mut Store) -> Result<SaveOutcome> {
        match self.prepare_save()? {
            None => Ok(SaveOutcome::Unchanged),
            Some(mutation) => {
                let result = store.apply(mutation);
                self.finish_save(result)
            }
        }
    }

    /// Discard the working copy; returns the snapshot unchanged
    pub fn cancel(&mut self) -> Item {
        self.state = SessionState::Cancelled;
        self.conflict = None;
        self.working = self.snapshot.clone();
        debug!(item = %self.item_key, "Edit session cancelled");
        self.snapshot.clone()
    }

    fn ensure_editing(&self) -> Result<()> {
        if self.state == SessionState::Editing {
            Ok(())
        } else {
            Err(StoreError::SessionClosed(self.item_key.clone()))
        }
    }

    /// Mutations that turn the snapshot into the working copy
    fn diff(&self) -> Vec<Mutation> {
        let key = &self.item_key;
        let mut mutations = Vec::new();

        if self.working.item_type != self.snapshot.item_type {
            mutations.push(Mutation::ChangeType {
                key: key.clone(),
                item_type: self.working.item_type.clone(),
                accept_dropped_fields: self.accept_dropped_fields,
            });
        }

        let before: HashMap<&str, &str> = self
            .snapshot
            .fields
            .values()
            .map(|field| (field.key.as_str(), field.value.as_str()))
            .collect();
        for field in self.working.fields.values() {
            if before.get(field.key.as_str()).copied().unwrap_or("") != field.value {
                mutations.push(Mutation::EditField {
                    key: key.clone(),
                    field: field.key.clone(),
                    value: field.value.clone(),
                });
            }
        }
        for field in self.snapshot.fields.values() {
            if !self.working.fields.contains_key(&field.key) && !field.is_empty() {
                mutations.push(Mutation::EditField {
                    key: key.clone(),
                    field: field.key.clone(),
                    value: String::new(),
                });
            }
        }

        if self.working.creators != self.snapshot.creators {
            mutations.push(Mutation::EditCreators {
                key: key.clone(),
                creators: self.working.creators.clone(),
            });
        }
        if self.working.tags != self.snapshot.tags {
            mutations.push(Mutation::EditTags {
                key: key.clone(),
                tags: self.working.tags.clone(),
            });
        }
        if self.working.notes != self.snapshot.notes {
            mutations.push(Mutation::EditNotes {
                key: key.clone(),
                notes: self.working.notes.clone(),
            });
        }

        mutations
    }
}

/// Replay the edits between `base` and `working` on top of `external`
fn rebase(base: &Item, working: &Item, external: &Item) -> Item {
    let mut rebased = external.clone();
    if working.item_type != base.item_type {
        rebased.item_type = working.item_type.clone();
    }
    for field in working.fields.values() {
        if base.field_value(&field.key) != Some(field.value.as_str()) {
            rebased.fields.insert(field.key.clone(), field.clone());
        }
    }
    for field in base.fields.values() {
        if !working.fields.contains_key(&field.key) {
            rebased.fields.remove(&field.key);
        }
    }
    if working.creators != base.creators {
        rebased.creators = working.creators.clone();
    }
    if working.tags != base.tags {
        rebased.tags = working.tags.clone();
    }
    if working.notes != base.notes {
        rebased.notes = working.notes.clone();
    }
    rebased
}
