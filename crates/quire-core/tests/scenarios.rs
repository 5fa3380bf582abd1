mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days};
use quire_core::attachment::{AttachmentContent, AttachmentLocation};
use quire_core::dates::ISO_DATE_FORMAT;
use quire_core::session::SaveOutcome;
use quire_core::{
    coordinator, Attachment, AttachmentFileDeleted, AttachmentImport, AttachmentLifecycle,
    AttachmentState, ChangeCategory, ChangeOrigin, Classification, ConflictResolution, EditSession, Item,
    LocationEvent, Mutation, Store, StoreError,
};

use common::{collaborators, memory_store, seed_synced, MemoryFiles};

fn dune() -> Item {
    let mut item = Item::with_key("DUNE2345", "book", 1)
        .field("title", "Dune")
        .field("publisher", "Chilton");
    item.version = 5;
    item
}

fn attachment_titles(store: &Store, key: &str) -> Vec<String> {
    store
        .item(key)
        .unwrap()
        .attachments
        .iter()
        .map(|a| a.title.clone())
        .collect()
}

#[test]
fn date_shortcut_resolves_to_tomorrow() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());

    store
        .apply(Mutation::EditField {
            key: "DUNE2345".into(),
            field: "date".into(),
            value: "tomorrow".into(),
        })
        .unwrap();

    let tomorrow = chrono::Local::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap();
    let item = store.item("DUNE2345").unwrap();
    let expected = tomorrow.format(ISO_DATE_FORMAT).to_string();
    assert_eq!(item.field_value("date"), Some(expected.as_str()));
    assert_eq!(item.parsed_date.as_ref().and_then(|d| d.day), Some(tomorrow.day()));
    assert!(item.change_markers.contains(ChangeCategory::Fields));
}

#[test]
fn added_attachments_sort_case_insensitively() {
    let files = Arc::new(MemoryFiles::with_files(["/inbox/B.pdf", "/inbox/a.pdf"]));
    let mut store = memory_store(files.clone());
    seed_synced(&mut store, dune());

    let change = store
        .apply(Mutation::AddAttachments {
            key: "DUNE2345".into(),
            imports: vec![
                AttachmentImport::new("B.pdf", "/inbox/B.pdf"),
                AttachmentImport::new("a.pdf", "/inbox/a.pdf"),
            ],
        })
        .unwrap();

    assert!(change.error.is_none());
    assert_eq!(attachment_titles(&store, "DUNE2345"), vec!["a.pdf", "B.pdf"]);
    assert!(!files.contains(&PathBuf::from("/inbox/a.pdf")));
    let item = store.item("DUNE2345").unwrap();
    assert!(item
        .attachments
        .iter()
        .all(|a| a.location() == AttachmentLocation::Local));
    assert!(item.change_markers.contains(ChangeCategory::Attachments));
}

#[test]
fn partially_failed_import_keeps_the_rest() {
    let files = Arc::new(MemoryFiles::with_files(["/inbox/a.pdf"]));
    let mut store = memory_store(files);
    seed_synced(&mut store, dune());

    let change = store
        .apply(Mutation::AddAttachments {
            key: "DUNE2345".into(),
            imports: vec![
                AttachmentImport::new("a.pdf", "/inbox/a.pdf"),
                AttachmentImport::new("gone.pdf", "/inbox/gone.pdf"),
            ],
        })
        .unwrap();

    assert_eq!(change.error, Some(StoreError::FileNotCopied(1)));
    assert_eq!(attachment_titles(&store, "DUNE2345"), vec!["a.pdf"]);
}

#[test]
fn individual_file_deletion_only_affects_that_attachment() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    let mut item = dune();
    item.attachments = vec![
        AttachmentLifecycle::imported("ATTA2345", "a.pdf", "/library/storage/ATTA2345/a.pdf".into()),
        AttachmentLifecycle::imported("ATTB2345", "b.pdf", "/library/storage/ATTB2345/b.pdf".into()),
    ];
    seed_synced(&mut store, item);

    let changes = store
        .handle_file_deleted(&AttachmentFileDeleted::Individual {
            key: "ATTA2345".into(),
            parent_key: Some("DUNE2345".into()),
            library_id: 1,
        })
        .unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(store.attachment_state("ATTA2345"), Some(AttachmentState::Remote));
    assert_eq!(store.attachment_state("ATTB2345"), Some(AttachmentState::Local));
    // Availability is device-local and never dirties the item
    assert!(!store.item("DUNE2345").unwrap().has_local_changes());
}

#[test]
fn type_change_reports_dropped_fields_until_accepted() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());
    let before = store.item("DUNE2345").unwrap().clone();

    let err = store
        .apply(Mutation::ChangeType {
            key: "DUNE2345".into(),
            item_type: "document".into(),
            accept_dropped_fields: false,
        })
        .unwrap_err();
    assert_eq!(err, StoreError::DroppedFieldsOnTypeChange(vec!["publisher".into()]));
    assert_eq!(store.item("DUNE2345"), Some(&before));

    store
        .apply(Mutation::ChangeType {
            key: "DUNE2345".into(),
            item_type: "document".into(),
            accept_dropped_fields: true,
        })
        .unwrap();
    let item = store.item("DUNE2345").unwrap();
    assert_eq!(item.item_type, "document");
    assert_eq!(item.title(), Some("Dune"));
    assert_eq!(item.field_value("publisher"), None);
    assert!(item.change_markers.contains(ChangeCategory::Type));
}

#[test]
fn sync_apply_is_idempotent() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    let server = dune();

    let first = store.apply(Mutation::SyncItem { item: server.clone() }).unwrap();
    let second = store.apply(Mutation::SyncItem { item: server }).unwrap();

    assert!(first.persisted);
    assert!(!first.markers_added);
    assert!(second.changes.is_empty());
    assert!(!second.persisted);
    assert!(!store.item("DUNE2345").unwrap().has_local_changes());
}

#[test]
fn mark_synced_is_cosmetic_and_skips_the_sync_feed() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());
    let mut feed = store.subscribe_sync();

    store
        .apply(Mutation::EditField {
            key: "DUNE2345".into(),
            field: "title".into(),
            value: "Dune Messiah".into(),
        })
        .unwrap();
    let event = feed.try_recv().unwrap();
    assert_eq!(event.classification, Classification::Substantive);

    let confirmed = store
        .apply(Mutation::MarkSynced {
            key: "DUNE2345".into(),
            version: 6,
        })
        .unwrap();

    assert_eq!(confirmed.classification, Classification::Cosmetic);
    assert!(feed.try_recv().is_err());
    let item = store.item("DUNE2345").unwrap();
    assert_eq!(item.version, 6);
    assert!(!item.has_local_changes());
    assert!(item.fields.values().all(|f| !f.changed));
}

#[test]
fn cancelled_download_leaves_attachment_remote() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    let mut item = dune();
    item.attachments.push(Attachment::new(
        "PDFA2345",
        "paper.pdf",
        AttachmentContent::File {
            path: "/library/storage/PDFA2345/paper.pdf".into(),
            link_type: quire_core::attachment::LinkType::ImportedFile,
        },
    ));
    seed_synced(&mut store, item);

    // Cancelling with nothing in flight is harmless
    store
        .apply(Mutation::EditAttachmentLocation {
            attachment: "PDFA2345".into(),
            event: LocationEvent::Cancelled,
        })
        .unwrap();

    store
        .apply(Mutation::EditAttachmentLocation {
            attachment: "PDFA2345".into(),
            event: LocationEvent::DownloadStarted,
        })
        .unwrap();
    assert!(matches!(
        store.attachment_state("PDFA2345"),
        Some(AttachmentState::Downloading { .. })
    ));

    let cancelled = store
        .apply(Mutation::EditAttachmentLocation {
            attachment: "PDFA2345".into(),
            event: LocationEvent::Cancelled,
        })
        .unwrap();

    assert!(!cancelled.persisted);
    assert_eq!(store.attachment_state("PDFA2345"), Some(AttachmentState::Remote));
    let late = store.apply(Mutation::EditAttachmentLocation {
        attachment: "PDFA2345".into(),
        event: LocationEvent::DownloadCompleted,
    });
    assert!(matches!(late, Err(StoreError::InvalidTransition { .. })));
}

#[test]
fn failed_batch_changes_nothing() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());
    let before = store.item("DUNE2345").unwrap().clone();

    let result = store.apply(Mutation::Batch {
        mutations: vec![
            Mutation::EditField {
                key: "DUNE2345".into(),
                field: "title".into(),
                value: "Changed".into(),
            },
            Mutation::EditField {
                key: "DUNE2345".into(),
                field: "pages".into(),
                value: "412".into(),
            },
        ],
    });

    assert!(result.is_err());
    assert_eq!(store.item("DUNE2345"), Some(&before));
}

#[test]
fn edit_session_saves_through_the_store() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());

    let mut session = EditSession::begin(&store, "DUNE2345").unwrap();
    session.set_field("title", "Children of Dune").unwrap();
    session.set_field("place", "Philadelphia").unwrap();

    let outcome = session.save(&mut store).unwrap();
    let SaveOutcome::Saved(change) = outcome else {
        panic!("expected a save");
    };
    assert!(change.markers_added);

    let item = store.item("DUNE2345").unwrap();
    assert_eq!(item.title(), Some("Children of Dune"));
    assert_eq!(item.field_value("place"), Some("Philadelphia"));
    assert!(matches!(session.save(&mut store), Err(StoreError::SessionClosed(_))));
}

#[test]
fn edit_session_detects_external_edit() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());

    let mut session = EditSession::begin(&store, "DUNE2345").unwrap();
    session.set_field("title", "Mine").unwrap();

    store
        .apply(Mutation::EditField {
            key: "DUNE2345".into(),
            field: "publisher".into(),
            value: "Ace".into(),
        })
        .unwrap();
    let external = store.item("DUNE2345").unwrap().clone();

    assert!(session.external_change(&external).is_some());
    assert_eq!(session.save(&mut store).unwrap_err(), StoreError::ConflictDuringEdit);

    session.resolve(ConflictResolution::KeepEditing);
    session.save(&mut store).unwrap();

    let item = store.item("DUNE2345").unwrap();
    assert_eq!(item.title(), Some("Mine"));
    assert_eq!(item.field_value("publisher"), Some("Ace"));
}

#[test]
fn edits_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = quire_core::Config::with_data_dir(dir.path());
    let files = Arc::new(MemoryFiles::default());

    {
        let mut store = Store::open(config.clone(), collaborators(files.clone())).unwrap();
        seed_synced(&mut store, dune());
        store
            .apply(Mutation::MarkTrashed {
                key: "DUNE2345".into(),
                trashed: true,
            })
            .unwrap();
    }

    let store = Store::open(config, collaborators(files)).unwrap();
    let item = store.item("DUNE2345").unwrap();
    assert!(item.deleted);
    assert!(item.change_markers.contains(ChangeCategory::Trash));
    assert_eq!(store.dirty_items().len(), 1);
}

#[test]
fn repeat_edits_of_a_dirty_field_all_reach_the_sync_feed() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());
    let mut feed = store.subscribe_sync();

    for title in ["First", "Second"] {
        store
            .apply(Mutation::EditField {
                key: "DUNE2345".into(),
                field: "title".into(),
                value: title.into(),
            })
            .unwrap();
    }
    store
        .apply(Mutation::SyncItem {
            item: dune().field("place", "Philadelphia"),
        })
        .unwrap();

    let first = feed.try_recv().unwrap();
    let second = feed.try_recv().unwrap();
    assert!(first.markers_added);
    assert!(!second.markers_added);
    assert!(second.needs_sync);
    assert_eq!(second.item.title(), Some("Second"));
    // The server write doesn't feed back into sync
    assert!(feed.try_recv().is_err());
}

#[test]
fn cancel_for_unknown_attachment_is_a_noop() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());
    let before = store.item("DUNE2345").unwrap().clone();

    let change = store
        .apply(Mutation::EditAttachmentLocation {
            attachment: "NOPE2345".into(),
            event: LocationEvent::Cancelled,
        })
        .unwrap();

    assert!(change.is_noop());
    assert!(!change.persisted);
    assert_eq!(store.item("DUNE2345"), Some(&before));

    // Other events still need a known attachment
    let started = store.apply(Mutation::EditAttachmentLocation {
        attachment: "NOPE2345".into(),
        event: LocationEvent::DownloadStarted,
    });
    assert_eq!(started.unwrap_err(), StoreError::AttachmentNotFound("NOPE2345".into()));
}

#[test]
fn verify_attachment_tracks_missing_files() {
    let files = Arc::new(MemoryFiles::default());
    let mut store = memory_store(files.clone());
    let path = PathBuf::from("/library/storage/ATTA2345/a.pdf");
    let mut item = dune();
    item.attachments = vec![AttachmentLifecycle::imported("ATTA2345", "a.pdf", path.clone())];
    seed_synced(&mut store, item);

    let change = store.verify_attachment("ATTA2345").unwrap();
    assert!(change.persisted);
    assert_eq!(store.attachment_state("ATTA2345"), Some(AttachmentState::Missing));
    assert!(!store.item("DUNE2345").unwrap().has_local_changes());

    files.add(path);
    store.verify_attachment("ATTA2345").unwrap();
    assert_eq!(store.attachment_state("ATTA2345"), Some(AttachmentState::Local));

    assert_eq!(
        store.verify_attachment("NOPE2345").unwrap_err(),
        StoreError::AttachmentNotFound("NOPE2345".into())
    );
}

#[test]
fn unchanged_batch_reports_the_effective_origin() {
    let mut store = memory_store(Arc::new(MemoryFiles::default()));
    seed_synced(&mut store, dune());

    let change = store
        .apply(Mutation::Batch {
            mutations: vec![
                Mutation::EditField {
                    key: "DUNE2345".into(),
                    field: "title".into(),
                    value: "Dune".into(),
                },
                Mutation::MarkSynced {
                    key: "DUNE2345".into(),
                    version: 5,
                },
            ],
        })
        .unwrap();

    assert!(change.changes.is_empty());
    assert_eq!(change.origin, ChangeOrigin::Sync);
    assert!(!change.needs_sync);
}

#[tokio::test]
async fn snapshot_download_extracts_in_background() {
    let files = Arc::new(MemoryFiles::default());
    let mut store = memory_store(files.clone());
    let mut item = dune();
    item.attachments.push(Attachment::new(
        "SNAP2345",
        "Snapshot",
        AttachmentContent::Snapshot {
            html_path: "/library/storage/SNAP2345/index.html".into(),
            zip_path: "/library/storage/SNAP2345.zip".into(),
        },
    ));
    seed_synced(&mut store, item);

    let (handle, task) = coordinator::spawn(store);
    let mut watcher = handle.observe("DUNE2345").await.unwrap();

    handle.download_started("SNAP2345").await.unwrap();
    handle.download_progress("SNAP2345", 0.5).await.unwrap();
    files.add("/library/storage/SNAP2345.zip");
    let completed = handle.download_completed("SNAP2345").await.unwrap();
    assert!(completed.extraction.is_some());

    let local = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = watcher.changed().await.expect("store task stopped");
            let attachment = &event.item.attachments[0];
            if attachment.location() == AttachmentLocation::Local {
                break;
            }
        }
    })
    .await;
    assert!(local.is_ok());
    assert_eq!(
        handle.attachment_state("SNAP2345").await.unwrap(),
        Some(AttachmentState::Local)
    );
    assert!(files.contains(&PathBuf::from("/library/storage/SNAP2345/index.html")));

    handle.shutdown().await;
    task.await.unwrap();
    assert!(matches!(
        handle.item("DUNE2345").await,
        Err(StoreError::CoordinatorStopped)
    ));
}
