//! Quire Core Library
//!
//! Change tracking and reconciliation for a local-first reference library.
//! Items (with their creators, tags, notes, attachments and annotations) are
//! edited offline and synced later; this crate decides what counts as a local
//! change, keeps attachment files consistent with their metadata, and stores
//! annotation geometry in page space.
//!
//! # Architecture
//!
//! - **Store**: sole owner of items. Writes are atomic mutations persisted to
//!   SQLite before they become visible.
//! - **Classifier**: tells substantive edits apart from sync bookkeeping.
//! - **Attachment lifecycle**: explicit state machine for file availability,
//!   with extraction on a background worker.
//! - **Edit session**: snapshot/working copy editing with conflict detection.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! logging::init(&config)?;
//! let store = Store::open(config, collaborators)?;
//! let (handle, _task) = coordinator::spawn(store);
//!
//! handle.apply(Mutation::EditField {
//!     key: "ABCD2345".into(),
//!     field: "title".into(),
//!     value: "Dune".into(),
//! }).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: mutations, commit pipeline, observers and sync merge
//! - `coordinator`: the store on its own task, behind a cloneable handle
//! - `session`: edit sessions
//! - `classifier`: change classification
//! - `attachment`: attachment model, lifecycle and extraction worker
//! - `geometry`: coordinate transforms and sort index
//! - `models`: items and annotations
//! - `storage`: SQLite persistence
//! - `collaborators`: traits for files, schemas, dates and pages
//! - `config`, `logging`: application setup

pub mod attachment;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod dates;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod models;
pub mod session;
pub mod storage;
pub mod store;

pub use attachment::{
    Attachment, AttachmentFileDeleted, AttachmentImport, AttachmentLifecycle, AttachmentState,
    LocationEvent,
};
pub use classifier::{classify, Classification, ItemChange, ItemProperty};
pub use collaborators::{Collaborators, DateParser, FileStorage, PageInfoProvider, SchemaProvider};
pub use config::Config;
pub use coordinator::StoreHandle;
pub use error::{Result, StoreError};
pub use geometry::{PageInfo, Point, Rect};
pub use models::{Annotation, ChangeCategory, ChangeOrigin, Item};
pub use session::{ConflictResolution, EditSession, SessionState};
pub use storage::StorageError;
pub use store::{AppliedChange, ItemChangeEvent, ItemWatcher, Mutation, Store};
