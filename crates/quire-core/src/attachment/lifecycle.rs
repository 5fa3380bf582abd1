//! Attachment availability state machine
//!
//! ```text
//!            start               complete (file)
//! remote ───────────► downloading ───────────────► local
//!   ▲  ▲                 │   │  complete (snapshot)   ▲
//!   │  └──── cancel ─────┘   └──► extracting ─────────┘
//!   │                              │ error
//!   │        error                 ▼
//!   │  downloading ───────────► failed (location stays remote)
//!   └──────────────── file deleted ◄──── local
//! ```
//!
//! `downloading` and `failed` are transient and never persisted; `location`
//! carries the persisted part.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::worker::ExtractionJob;
use super::{Attachment, AttachmentContent, AttachmentLocation, AttachmentState, LinkType};
use crate::error::{Result, StoreError};

/// Cooperative cancellation flag shared with the extraction worker
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    DownloadStarted,
    /// Fraction in `0.0..=1.0`
    DownloadProgress(f64),
    DownloadCompleted,
    DownloadFailed(String),
    ExtractionFinished(std::result::Result<(), String>),
    Cancelled,
    FileDeleted,
    FileVerified { exists: bool },
}

impl LocationEvent {
    fn describe(&self) -> &'static str {
        match self {
            LocationEvent::DownloadStarted => "start download",
            LocationEvent::DownloadProgress(_) => "report progress",
            LocationEvent::DownloadCompleted => "complete download",
            LocationEvent::DownloadFailed(_) => "fail download",
            LocationEvent::ExtractionFinished(_) => "finish extraction",
            LocationEvent::Cancelled => "cancel",
            LocationEvent::FileDeleted => "delete file",
            LocationEvent::FileVerified { .. } => "verify file",
        }
    }
}

/// Effect of one event on an attachment
#[derive(Debug, Clone, Default)]
pub struct Transition {
    /// Persisted location changed; the item must be saved
    pub location_changed: bool,
    /// Observers should redraw the attachment's row
    pub notify: bool,
    pub failure: Option<StoreError>,
    /// Snapshot payload waiting for the worker
    pub extraction: Option<ExtractionJob>,
    /// Token of a newly started transfer
    pub token: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Downloading,
    Extracting,
}

#[derive(Debug, Clone)]
struct Transfer {
    progress: f64,
    phase: Phase,
    token: CancellationToken,
}

/// In-memory transfer bookkeeping plus the transition rules
#[derive(Debug, Clone, Default)]
pub struct AttachmentLifecycle {
    transfers: HashMap<String, Transfer>,
    failures: HashMap<String, StoreError>,
}

impl AttachmentLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a freshly imported attachment whose payload is already in storage
    pub fn imported(key: impl Into<String>, title: impl Into<String>, path: PathBuf) -> Attachment {
        Attachment {
            key: key.into(),
            title: title.into(),
            content: AttachmentContent::File {
                path,
                link_type: LinkType::ImportedFile,
            },
            location: AttachmentLocation::Local,
        }
    }

    /// Keep the device-local location when server data replaces an attachment
    pub fn carry_over(server: &mut Attachment, local: &Attachment) {
        if server.content == local.content {
            server.location = local.location;
        }
    }

    pub fn state(&self, attachment: &Attachment) -> AttachmentState {
        if let Some(transfer) = self.transfers.get(&attachment.key) {
            return AttachmentState::Downloading {
                progress: transfer.progress,
            };
        }
        if let Some(error) = self.failures.get(&attachment.key) {
            return AttachmentState::Failed(error.clone());
        }
        match attachment.location {
            AttachmentLocation::Local => AttachmentState::Local,
            AttachmentLocation::Remote => AttachmentState::Remote,
            AttachmentLocation::Missing => AttachmentState::Missing,
        }
    }

    pub fn is_in_flight(&self, attachment_key: &str) -> bool {
        self.transfers.contains_key(attachment_key)
    }

    /// Cancel an in-flight transfer; `false` (and no effect) if there is none
    pub fn cancel(&mut self, attachment_key: &str) -> bool {
        match self.transfers.remove(attachment_key) {
            Some(transfer) => {
                transfer.token.cancel();
                debug!(attachment = attachment_key, "Transfer cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop transient state of an attachment that no longer exists
    pub fn forget(&mut self, attachment_key: &str) {
        self.cancel(attachment_key);
        self.failures.remove(attachment_key);
    }

    /// Apply `event` to `attachment`
    pub fn apply(&mut self, attachment: &mut Attachment, event: &LocationEvent) -> Result<Transition> {
        let key = attachment.key.clone();
        let mut transition = Transition::default();

        match event {
            LocationEvent::DownloadStarted => {
                let startable = attachment.is_downloadable()
                    && !self.transfers.contains_key(&key)
                    && matches!(
                        attachment.location,
                        AttachmentLocation::Remote | AttachmentLocation::Missing
                    );
                if !startable {
                    return Err(self.invalid(attachment, event));
                }
                let token = CancellationToken::new();
                self.failures.remove(&key);
                self.transfers.insert(
                    key.clone(),
                    Transfer {
                        progress: 0.0,
                        phase: Phase::Downloading,
                        token: token.clone(),
                    },
                );
                transition.token = Some(token);
                transition.notify = true;
                debug!(attachment = %key, "Download started");
            }
            LocationEvent::DownloadProgress(progress) => match self.transfers.get_mut(&key) {
                Some(transfer) if transfer.phase == Phase::Downloading => {
                    transfer.progress = progress.clamp(0.0, 1.0);
                    transition.notify = true;
                }
                _ => return Err(self.invalid(attachment, event)),
            },
            LocationEvent::DownloadCompleted => {
                let token = match self.transfers.get(&key) {
                    Some(transfer) if transfer.phase == Phase::Downloading => transfer.token.clone(),
                    _ => return Err(self.invalid(attachment, event)),
                };
                if let AttachmentContent::Snapshot { html_path, zip_path } = &attachment.content {
                    if let Some(transfer) = self.transfers.get_mut(&key) {
                        transfer.phase = Phase::Extracting;
                        transfer.progress = 1.0;
                    }
                    transition.extraction = Some(ExtractionJob {
                        attachment_key: key.clone(),
                        archive: zip_path.clone(),
                        html_path: html_path.clone(),
                        token,
                    });
                    debug!(attachment = %key, "Snapshot downloaded, extraction scheduled");
                } else {
                    self.transfers.remove(&key);
                    self.set_location(attachment, AttachmentLocation::Local, &mut transition);
                }
            }
            LocationEvent::DownloadFailed(message) => {
                if self.transfers.remove(&key).is_none() {
                    return Err(self.invalid(attachment, event));
                }
                let error = StoreError::download_failed(message.clone());
                warn!(attachment = %key, error = %error, "Download failed");
                self.record_failure(&key, error, &mut transition);
            }
            LocationEvent::ExtractionFinished(result) => {
                match self.transfers.get(&key) {
                    Some(transfer) if transfer.phase == Phase::Extracting => {}
                    _ => return Err(self.invalid(attachment, event)),
                }
                self.transfers.remove(&key);
                match result {
                    Ok(()) => self.set_location(attachment, AttachmentLocation::Local, &mut transition),
                    Err(message) => {
                        let error = StoreError::cant_unzip_or_move(message.clone());
                        warn!(attachment = %key, error = %error, "Snapshot extraction failed");
                        self.record_failure(&key, error, &mut transition);
                    }
                }
            }
            LocationEvent::Cancelled => {
                // Location is still remote; only the transient state goes away
                if self.cancel(&key) {
                    transition.notify = true;
                }
            }
            LocationEvent::FileDeleted => {
                if attachment.location == AttachmentLocation::Local && attachment.is_downloadable() {
                    self.set_location(attachment, AttachmentLocation::Remote, &mut transition);
                }
            }
            LocationEvent::FileVerified { exists } => {
                match (attachment.location, *exists) {
                    (AttachmentLocation::Local, false) if attachment.is_downloadable() => {
                        self.set_location(attachment, AttachmentLocation::Missing, &mut transition)
                    }
                    (AttachmentLocation::Missing, true) => {
                        self.set_location(attachment, AttachmentLocation::Local, &mut transition)
                    }
                    _ => {}
                }
            }
        }

        Ok(transition)
    }

    fn set_location(
        &mut self,
        attachment: &mut Attachment,
        location: AttachmentLocation,
        transition: &mut Transition,
    ) {
        if attachment.location == location {
            return;
        }
        debug!(
            attachment = %attachment.key,
            from = ?attachment.location,
            to = ?location,
            "Attachment location changed"
        );
        attachment.location = location;
        self.failures.remove(&attachment.key);
        transition.location_changed = true;
        transition.notify = true;
    }

    fn record_failure(&mut self, key: &str, error: StoreError, transition: &mut Transition) {
        self.failures.insert(key.to_string(), error.clone());
        transition.failure = Some(error);
        transition.notify = true;
    }

    fn invalid(&self, attachment: &Attachment, event: &LocationEvent) -> StoreError {
        StoreError::InvalidTransition {
            key: attachment.key.clone(),
            state: self.state(attachment).name().to_string(),
            event: event.describe().to_string(),
        }
    }
}
