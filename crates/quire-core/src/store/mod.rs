//! Entity store
//!
//! The `Store` owns every item and is the only thing that changes them. All
//! writes go through [`Store::apply`]:
//!
//! 1. the mutation runs against scratch copies of the touched items
//! 2. user edits add change markers, sync writes never do
//! 3. changed items are written to SQLite in one transaction
//! 4. only then are the copies swapped in and observers notified
//!
//! A failure at any step leaves memory and disk as they were.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open(config, collaborators)?;
//! let mut watcher = store.observe(&key);
//!
//! store.apply(Mutation::EditField {
//!     key: key.clone(),
//!     field: "title".into(),
//!     value: "Dune".into(),
//! })?;
//! ```

mod mutation;
mod observe;
mod reconcile;

pub use mutation::Mutation;
pub use observe::{AppliedChange, ItemChangeEvent, ItemWatcher};
pub use reconcile::merge_server_item;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::attachment::{
    Attachment, AttachmentFileDeleted, AttachmentLifecycle, AttachmentLocation, AttachmentState,
    ExtractionJob, LocationEvent,
};
use crate::classifier::{self, Classification, ItemChange};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::models::{ChangeCategory, ChangeOrigin, Item};
use crate::storage::SqliteStore;
use observe::Observers;

/// Owner of all items, their attachments' transfer state and observers
pub struct Store {
    persistence: SqliteStore,
    items: BTreeMap<String, Item>,
    lifecycle: AttachmentLifecycle,
    observers: Observers,
    collaborators: Collaborators,
    config: Config,
}

impl Store {
    /// Open the store backed by the database in the configured data directory
    pub fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        let persistence = SqliteStore::open(&config)?;
        Self::with_persistence(persistence, config, collaborators)
    }

    /// Open a store whose database lives in memory (for testing)
    pub fn open_in_memory(config: Config, collaborators: Collaborators) -> Result<Self> {
        let persistence = SqliteStore::open_in_memory()?;
        Self::with_persistence(persistence, config, collaborators)
    }

    fn with_persistence(
        persistence: SqliteStore,
        config: Config,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let items: BTreeMap<String, Item> = persistence
            .load_all()?
            .into_iter()
            .map(|item| (item.key.clone(), item))
            .collect();
        info!(items = items.len(), "Store opened");

        Ok(Self {
            persistence,
            items,
            lifecycle: AttachmentLifecycle::new(),
            observers: Observers::default(),
            collaborators,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    // ==================== Reads ====================

    pub fn item(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    /// Every item, ordered by key
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Items with change markers the sync layer hasn't uploaded yet
    pub fn dirty_items(&self) -> Vec<&Item> {
        self.items
            .values()
            .filter(|item| item.has_local_changes())
            .collect()
    }

    /// Attachment by key together with the item that owns it
    pub fn attachment(&self, attachment_key: &str) -> Option<(&Item, &Attachment)> {
        self.items.values().find_map(|item| {
            item.attachment_index(attachment_key)
                .map(|index| (item, &item.attachments[index]))
        })
    }

    /// Location plus transient transfer state
    pub fn attachment_state(&self, attachment_key: &str) -> Option<AttachmentState> {
        self.attachment(attachment_key)
            .map(|(_, attachment)| self.lifecycle.state(attachment))
    }

    // ==================== Subscriptions ====================

    /// Latest-state stream of events for one item
    pub fn observe(&mut self, item_key: &str) -> ItemWatcher {
        self.observers.watch(item_key)
    }

    /// Lossless feed of every event that added change markers
    pub fn subscribe_sync(&mut self) -> mpsc::UnboundedReceiver<ItemChangeEvent> {
        self.observers.subscribe_sync()
    }

    // ==================== Writes ====================

    /// Apply one mutation atomically
    pub fn apply(&mut self, mutation: Mutation) -> Result<AppliedChange> {
        if let Mutation::EditAttachmentLocation {
            attachment,
            event: LocationEvent::Cancelled,
        } = &mutation
        {
            if self.attachment(attachment).is_none() {
                debug!(attachment = %attachment, "Cancel for unknown attachment ignored");
                return Ok(AppliedChange::unchanged(String::new(), ChangeOrigin::User));
            }
        }

        let target = self.target_key(&mutation)?;
        let fallback = mutation.origin();
        debug!(item = %target, mutation = mutation.name(), "Applying mutation");

        let mut scratch = Scratch::new(self.lifecycle.clone());
        self.apply_mutation(&mut scratch, mutation)?;
        let origin = scratch
            .origins
            .get(&target)
            .copied()
            .or_else(|| self.items.get(&target).map(|item| item.change_origin))
            .unwrap_or(fallback);
        let changes = self.commit(scratch)?;

        Ok(changes
            .into_iter()
            .find(|change| change.item_key == target)
            .unwrap_or_else(|| AppliedChange::unchanged(target, origin)))
    }

    /// React to attachment files deleted from disk
    ///
    /// Every covered local attachment becomes remote. All affected items are
    /// persisted in one transaction.
    pub fn handle_file_deleted(&mut self, deleted: &AttachmentFileDeleted) -> Result<Vec<AppliedChange>> {
        let affected: Vec<(String, String)> = self
            .items
            .values()
            .flat_map(|item| {
                item.attachments
                    .iter()
                    .filter(move |attachment| {
                        attachment.location() == AttachmentLocation::Local && deleted.covers(item, attachment)
                    })
                    .map(move |attachment| (item.key.clone(), attachment.key.clone()))
            })
            .collect();

        if affected.is_empty() {
            debug!(scope = ?deleted, "File deletion affects no local attachments");
            return Ok(Vec::new());
        }

        let mut scratch = Scratch::new(self.lifecycle.clone());
        for (item_key, attachment_key) in &affected {
            self.apply_location_event(&mut scratch, item_key, attachment_key, &LocationEvent::FileDeleted)?;
        }
        let changes = self.commit(scratch)?;
        info!(attachments = affected.len(), "Attachments marked remote after file deletion");
        Ok(changes)
    }

    /// Check that a local attachment's file still exists, and vice versa
    pub fn verify_attachment(&mut self, attachment_key: &str) -> Result<AppliedChange> {
        let (item_key, path) = match self.attachment(attachment_key) {
            Some((item, attachment)) => (item.key.clone(), attachment.file_path().map(|p| p.to_path_buf())),
            None => return Err(StoreError::AttachmentNotFound(attachment_key.to_string())),
        };
        let Some(path) = path else {
            return Ok(AppliedChange::unchanged(item_key, ChangeOrigin::User));
        };
        let exists = self.collaborators.files.exists(&path);
        self.apply(Mutation::EditAttachmentLocation {
            attachment: attachment_key.to_string(),
            event: LocationEvent::FileVerified { exists },
        })
    }

    /// Key of the item a mutation is about
    fn target_key(&self, mutation: &Mutation) -> Result<String> {
        match mutation {
            Mutation::EditAttachmentLocation { attachment, .. } => self
                .attachment(attachment)
                .map(|(item, _)| item.key.clone())
                .ok_or_else(|| StoreError::AttachmentNotFound(attachment.clone())),
            Mutation::Batch { mutations } => {
                let mut keys = BTreeSet::new();
                for mutation in mutations {
                    keys.insert(self.target_key(mutation)?);
                }
                match keys.len() {
                    1 => Ok(keys.into_iter().next().unwrap_or_default()),
                    0 => Err(StoreError::cant_create_data("batch is empty")),
                    _ => Err(StoreError::cant_create_data("batch spans more than one item")),
                }
            }
            other => Ok(other.item_key().to_string()),
        }
    }

    /// Persist scratch state, swap it in and notify
    fn commit(&mut self, scratch: Scratch) -> Result<Vec<AppliedChange>> {
        let Scratch {
            mut items,
            created,
            lifecycle,
            marks,
            origins,
            notify,
            mut extractions,
            mut failures,
        } = scratch;
        let now = Utc::now();
        let mut changes = Vec::with_capacity(items.len());
        let mut to_save = Vec::new();

        for (key, item) in items.iter_mut() {
            let origin = origins.get(key).copied().unwrap_or(item.change_origin);
            let mut markers_added = false;
            let mut user_edit = false;
            if origin == ChangeOrigin::User {
                if let Some(categories) = marks.get(key).filter(|c| !c.is_empty()) {
                    for category in categories {
                        markers_added |= item.change_markers.insert(*category);
                    }
                    item.change_origin = ChangeOrigin::User;
                    item.date_modified = now;
                    user_edit = true;
                }
            }

            let prior = if created.contains(key) {
                None
            } else {
                self.items.get(key)
            };
            let (mut item_changes, classification, persisted) = match prior {
                None => (vec![ItemChange::Created], Classification::Substantive, true),
                Some(prior) if *prior == *item => (Vec::new(), Classification::Substantive, false),
                Some(prior) => (
                    classifier::item_changes(prior, item),
                    classifier::classify(prior, item),
                    true,
                ),
            };

            for index in notify.get(key).into_iter().flatten() {
                if let Some(attachment) = item.attachments.get(*index) {
                    let change = ItemChange::Attachment {
                        index: *index,
                        key: attachment.key.clone(),
                    };
                    if !item_changes.contains(&change) {
                        item_changes.push(change);
                    }
                }
            }

            if persisted {
                to_save.push(key.clone());
            }
            changes.push(AppliedChange {
                item_key: key.clone(),
                changes: item_changes,
                classification,
                origin,
                markers_added,
                needs_sync: user_edit && persisted && !classification.is_cosmetic(),
                persisted,
                extraction: extractions.remove(key),
                error: failures.remove(key),
            });
        }

        let batch: Vec<&Item> = to_save.iter().filter_map(|key| items.get(key)).collect();
        if let Err(e) = self.persistence.save_items(&batch) {
            error!(error = %e, items = batch.len(), "Failed to persist changes");
            return Err(e.into());
        }

        self.lifecycle = lifecycle;
        for key in &to_save {
            if let Some(item) = items.remove(key) {
                self.items.insert(key.clone(), item);
            }
        }

        for change in &changes {
            if let Some(item) = self.items.get(&change.item_key) {
                self.observers.emit(change, Arc::new(item.clone()));
            }
        }

        Ok(changes)
    }
}

/// Scratch state of one `apply` call
pub(crate) struct Scratch {
    items: BTreeMap<String, Item>,
    created: BTreeSet<String>,
    lifecycle: AttachmentLifecycle,
    marks: BTreeMap<String, BTreeSet<ChangeCategory>>,
    origins: BTreeMap<String, ChangeOrigin>,
    /// Attachment indexes whose transient state changed, per item
    notify: BTreeMap<String, BTreeSet<usize>>,
    extractions: BTreeMap<String, ExtractionJob>,
    failures: BTreeMap<String, StoreError>,
}

impl Scratch {
    fn new(lifecycle: AttachmentLifecycle) -> Self {
        Self {
            items: BTreeMap::new(),
            created: BTreeSet::new(),
            lifecycle,
            marks: BTreeMap::new(),
            origins: BTreeMap::new(),
            notify: BTreeMap::new(),
            extractions: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    fn contains(&self, committed: &BTreeMap<String, Item>, key: &str) -> bool {
        self.items.contains_key(key) || committed.contains_key(key)
    }

    /// Working copy of an item, cloned from the committed state on first use
    fn item_mut(&mut self, committed: &BTreeMap<String, Item>, key: &str) -> Result<&mut Item> {
        if !self.items.contains_key(key) {
            let item = committed
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::ItemNotFound(key.to_string()))?;
            self.items.insert(key.to_string(), item);
        }
        self.items
            .get_mut(key)
            .ok_or_else(|| StoreError::ItemNotFound(key.to_string()))
    }

    fn insert_new(&mut self, item: Item) {
        self.created.insert(item.key.clone());
        self.items.insert(item.key.clone(), item);
    }

    /// Record a user edit of `category`
    fn mark(&mut self, key: &str, categories: impl IntoIterator<Item = ChangeCategory>) {
        let entry = self.marks.entry(key.to_string()).or_default();
        entry.extend(categories);
        if !entry.is_empty() {
            self.origins.insert(key.to_string(), ChangeOrigin::User);
        }
    }

    fn set_origin(&mut self, key: &str, origin: ChangeOrigin) {
        self.origins.insert(key.to_string(), origin);
    }
}
