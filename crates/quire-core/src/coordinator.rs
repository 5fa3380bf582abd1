//! Store task
//!
//! The store runs on a single tokio task. Callers talk to it through a
//! cloneable [`StoreHandle`]; each request carries a oneshot for the reply.
//! The task also listens for file deletion notices and for results from the
//! extraction worker, so every write is serialized through one place.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::attachment::{
    AttachmentFileDeleted, AttachmentState, ExtractionResult, ExtractionWorker, LocationEvent,
};
use crate::error::{Result, StoreError};
use crate::models::Item;
use crate::store::{AppliedChange, ItemChangeEvent, ItemWatcher, Mutation, Store};

const COMMAND_BUFFER: usize = 64;
const DELETION_BUFFER: usize = 16;

enum Command {
    Apply {
        mutation: Mutation,
        reply: oneshot::Sender<Result<AppliedChange>>,
    },
    Observe {
        item_key: String,
        reply: oneshot::Sender<ItemWatcher>,
    },
    SubscribeSync {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<ItemChangeEvent>>,
    },
    Item {
        item_key: String,
        reply: oneshot::Sender<Option<Item>>,
    },
    AttachmentState {
        attachment_key: String,
        reply: oneshot::Sender<Option<AttachmentState>>,
    },
    Shutdown,
}

/// Cloneable access to a store running on its own task
#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::Sender<Command>,
    deletions: mpsc::Sender<AttachmentFileDeleted>,
}

/// Move `store` onto a new task
///
/// Must be called from within a tokio runtime. The task ends when every
/// handle is dropped or [`StoreHandle::shutdown`] is called.
pub fn spawn(store: Store) -> (StoreHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (deletion_tx, deletion_rx) = mpsc::channel(DELETION_BUFFER);
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let worker = ExtractionWorker::new(store.collaborators().files.clone(), result_tx);

    let task = tokio::spawn(store_task(store, worker, command_rx, deletion_rx, result_rx));

    (
        StoreHandle {
            commands: command_tx,
            deletions: deletion_tx,
        },
        task,
    )
}

impl StoreHandle {
    pub async fn apply(&self, mutation: Mutation) -> Result<AppliedChange> {
        self.request(|reply| Command::Apply { mutation, reply }).await?
    }

    pub async fn observe(&self, item_key: &str) -> Result<ItemWatcher> {
        let item_key = item_key.to_string();
        self.request(|reply| Command::Observe { item_key, reply }).await
    }

    pub async fn subscribe_sync(&self) -> Result<mpsc::UnboundedReceiver<ItemChangeEvent>> {
        self.request(|reply| Command::SubscribeSync { reply }).await
    }

    /// Current committed state of an item
    pub async fn item(&self, item_key: &str) -> Result<Option<Item>> {
        let item_key = item_key.to_string();
        self.request(|reply| Command::Item { item_key, reply }).await
    }

    pub async fn attachment_state(&self, attachment_key: &str) -> Result<Option<AttachmentState>> {
        let attachment_key = attachment_key.to_string();
        self.request(|reply| Command::AttachmentState {
            attachment_key,
            reply,
        })
        .await
    }

    // ==================== Downloads ====================

    pub async fn download_started(&self, attachment_key: &str) -> Result<AppliedChange> {
        self.location_event(attachment_key, LocationEvent::DownloadStarted).await
    }

    pub async fn download_progress(&self, attachment_key: &str, progress: f64) -> Result<AppliedChange> {
        self.location_event(attachment_key, LocationEvent::DownloadProgress(progress))
            .await
    }

    /// Snapshot archives continue with extraction on the worker
    pub async fn download_completed(&self, attachment_key: &str) -> Result<AppliedChange> {
        self.location_event(attachment_key, LocationEvent::DownloadCompleted).await
    }

    pub async fn download_failed(&self, attachment_key: &str, reason: impl Into<String>) -> Result<AppliedChange> {
        self.location_event(attachment_key, LocationEvent::DownloadFailed(reason.into()))
            .await
    }

    /// Cancel a download or extraction; a late worker result is discarded
    pub async fn cancel_download(&self, attachment_key: &str) -> Result<AppliedChange> {
        self.location_event(attachment_key, LocationEvent::Cancelled).await
    }

    /// Report attachment files that were removed from disk
    pub async fn files_deleted(&self, deleted: AttachmentFileDeleted) -> Result<()> {
        self.deletions
            .send(deleted)
            .await
            .map_err(|_| StoreError::CoordinatorStopped)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn location_event(&self, attachment_key: &str, event: LocationEvent) -> Result<AppliedChange> {
        self.apply(Mutation::EditAttachmentLocation {
            attachment: attachment_key.to_string(),
            event,
        })
        .await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| StoreError::CoordinatorStopped)?;
        reply_rx.await.map_err(|_| StoreError::CoordinatorStopped)
    }
}

async fn store_task(
    mut store: Store,
    worker: ExtractionWorker,
    mut command_rx: mpsc::Receiver<Command>,
    mut deletion_rx: mpsc::Receiver<AttachmentFileDeleted>,
    mut result_rx: mpsc::UnboundedReceiver<ExtractionResult>,
) {
    info!("Store task started");

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                if !handle_command(&mut store, &worker, command) {
                    break;
                }
            }

            Some(deleted) = deletion_rx.recv() => {
                match store.handle_file_deleted(&deleted) {
                    Ok(changes) => {
                        debug!(scope = ?deleted, items = changes.len(), "Handled file deletion");
                    }
                    Err(e) => error!(scope = ?deleted, error = %e, "Failed to handle file deletion"),
                }
            }

            Some(result) = result_rx.recv() => {
                handle_extraction_result(&mut store, &worker, result);
            }
        }
    }

    info!("Store task stopped");
}

/// Returns false when the task should stop
fn handle_command(store: &mut Store, worker: &ExtractionWorker, command: Command) -> bool {
    match command {
        Command::Apply { mutation, reply } => {
            let result = store.apply(mutation);
            if let Ok(change) = &result {
                start_extraction(worker, change);
            }
            let _ = reply.send(result);
        }
        Command::Observe { item_key, reply } => {
            let _ = reply.send(store.observe(&item_key));
        }
        Command::SubscribeSync { reply } => {
            let _ = reply.send(store.subscribe_sync());
        }
        Command::Item { item_key, reply } => {
            let _ = reply.send(store.item(&item_key).cloned());
        }
        Command::AttachmentState {
            attachment_key,
            reply,
        } => {
            let _ = reply.send(store.attachment_state(&attachment_key));
        }
        Command::Shutdown => return false,
    }
    true
}

fn start_extraction(worker: &ExtractionWorker, change: &AppliedChange) {
    if let Some(job) = change.extraction.clone() {
        debug!(attachment = %job.attachment_key, "Starting snapshot extraction");
        worker.spawn(job);
    }
}

fn handle_extraction_result(store: &mut Store, worker: &ExtractionWorker, result: ExtractionResult) {
    if result.cancelled {
        debug!(attachment = %result.attachment_key, "Discarding result of cancelled extraction");
        return;
    }
    let mutation = Mutation::EditAttachmentLocation {
        attachment: result.attachment_key.clone(),
        event: LocationEvent::ExtractionFinished(result.outcome),
    };
    match store.apply(mutation) {
        Ok(change) => start_extraction(worker, &change),
        Err(e) => warn!(attachment = %result.attachment_key, error = %e, "Extraction result not applied"),
    }
}
