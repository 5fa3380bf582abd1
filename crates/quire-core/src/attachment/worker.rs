//! Background snapshot extraction
//!
//! Unzipping runs on tokio's blocking pool. Results come back over an
//! unbounded channel and are fed into the lifecycle as
//! `LocationEvent::ExtractionFinished` by whoever owns the store.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::lifecycle::CancellationToken;
use crate::collaborators::FileStorage;

/// Downloaded snapshot archive waiting to be unpacked
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub attachment_key: String,
    pub archive: PathBuf,
    pub html_path: PathBuf,
    pub token: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub attachment_key: String,
    pub outcome: Result<(), String>,
    /// The transfer was cancelled while the job ran; the result must be dropped
    pub cancelled: bool,
}

/// Unpack a snapshot archive, or move a plain html download into place
pub fn run_extraction(files: &dyn FileStorage, job: &ExtractionJob) -> Result<(), String> {
    if job.token.is_cancelled() {
        return Err("cancelled".to_string());
    }

    let destination = job
        .html_path
        .parent()
        .ok_or_else(|| format!("snapshot path {:?} has no parent directory", job.html_path))?;
    files
        .create_directories(destination)
        .map_err(|e| format!("can't create {:?}: {}", destination, e))?;

    if files.is_archive(&job.archive) {
        files
            .unzip(&job.archive, destination)
            .map_err(|e| format!("can't unzip {:?}: {}", job.archive, e))?;
        if let Err(e) = files.remove(&job.archive) {
            warn!(archive = ?job.archive, error = %e, "Failed to remove snapshot archive");
        }
        if !files.exists(&job.html_path) {
            return Err(format!("archive did not contain {:?}", job.html_path));
        }
    } else {
        files
            .move_file(&job.archive, &job.html_path)
            .map_err(|e| format!("can't move {:?}: {}", job.archive, e))?;
    }

    debug!(attachment = %job.attachment_key, "Snapshot extracted");
    Ok(())
}

/// Runs extraction jobs off the async executor
#[derive(Clone)]
pub struct ExtractionWorker {
    files: Arc<dyn FileStorage>,
    results: mpsc::UnboundedSender<ExtractionResult>,
}

impl ExtractionWorker {
    pub fn new(files: Arc<dyn FileStorage>, results: mpsc::UnboundedSender<ExtractionResult>) -> Self {
        Self { files, results }
    }

    /// Must be called from within a tokio runtime
    pub fn spawn(&self, job: ExtractionJob) -> JoinHandle<()> {
        let files = Arc::clone(&self.files);
        let results = self.results.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = run_extraction(files.as_ref(), &job);
            let result = ExtractionResult {
                attachment_key: job.attachment_key.clone(),
                outcome,
                cancelled: job.token.is_cancelled(),
            };
            if results.send(result).is_err() {
                debug!(attachment = %job.attachment_key, "Extraction result dropped, receiver gone");
            }
        })
    }
}
