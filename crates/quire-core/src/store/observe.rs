//! Change notification
//!
//! Two kinds of subscribers with different delivery guarantees:
//!
//! - [`ItemWatcher`] (per item, `tokio::sync::watch`): only the latest event
//!   is kept, so rapid local edits coalesce. Meant for views.
//! - sync feed (`tokio::sync::mpsc`, unbounded): every persisted user edit,
//!   in apply order, including repeat edits of an already dirty category.
//!   Nothing is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::attachment::ExtractionJob;
use crate::classifier::{Classification, ItemChange};
use crate::error::StoreError;
use crate::models::{ChangeOrigin, Item};

/// Result of one `Store::apply` call for one item
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub item_key: String,
    pub changes: Vec<ItemChange>,
    pub classification: Classification,
    pub origin: ChangeOrigin,
    /// The write added at least one change marker
    pub markers_added: bool,
    /// The write holds user edits the sync layer has to upload
    pub needs_sync: bool,
    /// The item was written to the database
    pub persisted: bool,
    /// Snapshot archive the caller must hand to the extraction worker
    pub extraction: Option<ExtractionJob>,
    /// Non-fatal failure reported alongside a successful apply
    pub error: Option<StoreError>,
}

impl AppliedChange {
    pub(crate) fn unchanged(item_key: impl Into<String>, origin: ChangeOrigin) -> Self {
        Self {
            item_key: item_key.into(),
            changes: Vec::new(),
            classification: Classification::Substantive,
            origin,
            markers_added: false,
            needs_sync: false,
            persisted: false,
            extraction: None,
            error: None,
        }
    }

    /// Nothing happened that anyone needs to hear about
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.error.is_none() && self.extraction.is_none()
    }
}

/// Event delivered to watchers and the sync feed
#[derive(Debug, Clone)]
pub struct ItemChangeEvent {
    /// Store-wide, increases with every emitted event
    pub sequence: u64,
    pub item_key: String,
    pub changes: Vec<ItemChange>,
    pub classification: Classification,
    pub origin: ChangeOrigin,
    pub markers_added: bool,
    pub needs_sync: bool,
    pub error: Option<StoreError>,
    /// Item state after the write
    pub item: Arc<Item>,
}

/// Latest-state subscription to one item
pub struct ItemWatcher {
    receiver: watch::Receiver<Option<ItemChangeEvent>>,
}

impl ItemWatcher {
    /// Most recent event, if any was emitted since the watcher was created
    pub fn latest(&self) -> Option<ItemChangeEvent> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next event; `None` once the store is gone
    pub async fn changed(&mut self) -> Option<ItemChangeEvent> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    /// Whether an event arrived that hasn't been read with `changed`
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    sequence: u64,
    watchers: HashMap<String, watch::Sender<Option<ItemChangeEvent>>>,
    sync_feed: Vec<mpsc::UnboundedSender<ItemChangeEvent>>,
}

impl Observers {
    pub(crate) fn watch(&mut self, item_key: &str) -> ItemWatcher {
        let sender = self
            .watchers
            .entry(item_key.to_string())
            .or_insert_with(|| watch::channel(None).0);
        ItemWatcher {
            receiver: sender.subscribe(),
        }
    }

    pub(crate) fn subscribe_sync(&mut self) -> mpsc::UnboundedReceiver<ItemChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sync_feed.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, change: &AppliedChange, item: Arc<Item>) {
        if change.changes.is_empty() && change.error.is_none() {
            return;
        }
        self.sequence += 1;
        let event = ItemChangeEvent {
            sequence: self.sequence,
            item_key: change.item_key.clone(),
            changes: change.changes.clone(),
            classification: change.classification,
            origin: change.origin,
            markers_added: change.markers_added,
            needs_sync: change.needs_sync,
            error: change.error.clone(),
            item,
        };
        trace!(item = %event.item_key, sequence = event.sequence, "Emitting change event");

        let stale = match self.watchers.get(&event.item_key) {
            Some(sender) if sender.receiver_count() == 0 => true,
            Some(sender) => {
                sender.send_replace(Some(event.clone()));
                false
            }
            None => false,
        };
        if stale {
            self.watchers.remove(&event.item_key);
        }

        if event.needs_sync {
            self.sync_feed.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
