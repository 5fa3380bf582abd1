//! Mutation requests and how each one changes the scratch state

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::{reconcile, Scratch, Store};
use crate::attachment::{AttachmentImport, AttachmentLifecycle, LocationEvent};
use crate::collaborators::FieldDescriptor;
use crate::dates;
use crate::error::{Result, StoreError};
use crate::geometry::{self, PageInfo, Point, Rect};
use crate::models::{
    generate_key, Annotation, AnnotationDraft, AnnotationEdit, AnnotationType, ChangeCategory,
    ChangeOrigin, Creator, Field, Item, Note, Tag,
};

/// A write request against the store
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert a new item; `origin` decides whether it starts out dirty
    CreateItem { item: Item, origin: ChangeOrigin },
    /// Set one field; date fields accept `today`, `yesterday` and `tomorrow`
    EditField { key: String, field: String, value: String },
    EditCreators { key: String, creators: Vec<Creator> },
    EditNotes { key: String, notes: Vec<Note> },
    EditTags { key: String, tags: BTreeSet<Tag> },
    /// Add an annotation drawn in presentation space
    CreateAnnotation { key: String, draft: AnnotationDraft },
    EditAnnotation {
        key: String,
        annotation: String,
        edit: AnnotationEdit,
    },
    /// Drive an attachment's lifecycle
    EditAttachmentLocation { attachment: String, event: LocationEvent },
    /// Move files into storage as new attachments
    AddAttachments {
        key: String,
        imports: Vec<AttachmentImport>,
    },
    RemoveAttachment { key: String, attachment: String },
    ChangeType {
        key: String,
        item_type: String,
        /// Confirms that populated fields without an equivalent may be dropped
        accept_dropped_fields: bool,
    },
    MarkTrashed { key: String, trashed: bool },
    /// The server confirmed `version`; clears every change marker
    MarkSynced { key: String, version: u64 },
    /// Server state for an item, merged over local edits
    SyncItem { item: Item },
    /// Several mutations of one item, applied all or nothing
    Batch { mutations: Vec<Mutation> },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateItem { .. } => "create_item",
            Mutation::EditField { .. } => "edit_field",
            Mutation::EditCreators { .. } => "edit_creators",
            Mutation::EditNotes { .. } => "edit_notes",
            Mutation::EditTags { .. } => "edit_tags",
            Mutation::CreateAnnotation { .. } => "create_annotation",
            Mutation::EditAnnotation { .. } => "edit_annotation",
            Mutation::EditAttachmentLocation { .. } => "edit_attachment_location",
            Mutation::AddAttachments { .. } => "add_attachments",
            Mutation::RemoveAttachment { .. } => "remove_attachment",
            Mutation::ChangeType { .. } => "change_type",
            Mutation::MarkTrashed { .. } => "mark_trashed",
            Mutation::MarkSynced { .. } => "mark_synced",
            Mutation::SyncItem { .. } => "sync_item",
            Mutation::Batch { .. } => "batch",
        }
    }

    /// Item the mutation addresses directly
    ///
    /// Empty for `EditAttachmentLocation` and `Batch`, which the store
    /// resolves itself.
    pub(crate) fn item_key(&self) -> &str {
        match self {
            Mutation::CreateItem { item, .. } | Mutation::SyncItem { item } => &item.key,
            Mutation::EditField { key, .. }
            | Mutation::EditCreators { key, .. }
            | Mutation::EditNotes { key, .. }
            | Mutation::EditTags { key, .. }
            | Mutation::CreateAnnotation { key, .. }
            | Mutation::EditAnnotation { key, .. }
            | Mutation::AddAttachments { key, .. }
            | Mutation::RemoveAttachment { key, .. }
            | Mutation::ChangeType { key, .. }
            | Mutation::MarkTrashed { key, .. }
            | Mutation::MarkSynced { key, .. } => key,
            Mutation::EditAttachmentLocation { .. } | Mutation::Batch { .. } => "",
        }
    }

    pub(crate) fn origin(&self) -> ChangeOrigin {
        match self {
            Mutation::CreateItem { origin, .. } => *origin,
            Mutation::MarkSynced { .. } | Mutation::SyncItem { .. } => ChangeOrigin::Sync,
            // Later mutations override earlier ones, as they do in the scratch state
            Mutation::Batch { mutations } => mutations
                .last()
                .map_or(ChangeOrigin::User, |mutation| mutation.origin()),
            _ => ChangeOrigin::User,
        }
    }
}

impl Store {
    pub(super) fn apply_mutation(&self, scratch: &mut Scratch, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::CreateItem { item, origin } => self.create_item(scratch, item, origin),
            Mutation::EditField { key, field, value } => self.edit_field(scratch, &key, &field, value),
            Mutation::EditCreators { key, mut creators } => {
                for (index, creator) in creators.iter_mut().enumerate() {
                    creator.order_index = index;
                }
                let item = scratch.item_mut(&self.items, &key)?;
                if item.creators != creators {
                    item.creators = creators;
                    scratch.mark(&key, [ChangeCategory::Creators]);
                }
                Ok(())
            }
            Mutation::EditNotes { key, notes } => {
                let item = scratch.item_mut(&self.items, &key)?;
                if item.notes != notes {
                    item.notes = notes;
                    scratch.mark(&key, [ChangeCategory::Notes]);
                }
                Ok(())
            }
            Mutation::EditTags { key, tags } => {
                let item = scratch.item_mut(&self.items, &key)?;
                if item.tags != tags {
                    item.tags = tags;
                    scratch.mark(&key, [ChangeCategory::Tags]);
                }
                Ok(())
            }
            Mutation::CreateAnnotation { key, draft } => self.create_annotation(scratch, &key, draft),
            Mutation::EditAnnotation {
                key,
                annotation,
                edit,
            } => self.edit_annotation(scratch, &key, &annotation, &edit),
            Mutation::EditAttachmentLocation { attachment, event } => {
                let owner = self
                    .attachment(&attachment)
                    .map(|(item, _)| item.key.clone())
                    .ok_or_else(|| StoreError::AttachmentNotFound(attachment.clone()))?;
                self.apply_location_event(scratch, &owner, &attachment, &event)
            }
            Mutation::AddAttachments { key, imports } => self.add_attachments(scratch, &key, imports),
            Mutation::RemoveAttachment { key, attachment } => {
                if scratch.lifecycle.is_in_flight(&attachment) {
                    return Err(StoreError::CantTrashAttachment(attachment));
                }
                let item = scratch.item_mut(&self.items, &key)?;
                let index = item
                    .attachment_index(&attachment)
                    .ok_or_else(|| StoreError::AttachmentNotFound(attachment.clone()))?;
                item.attachments.remove(index);
                scratch.lifecycle.forget(&attachment);
                scratch.mark(&key, [ChangeCategory::AttachmentFileRemoved]);
                Ok(())
            }
            Mutation::ChangeType {
                key,
                item_type,
                accept_dropped_fields,
            } => self.change_type(scratch, &key, &item_type, accept_dropped_fields),
            Mutation::MarkTrashed { key, trashed } => {
                let item = scratch.item_mut(&self.items, &key)?;
                if item.deleted != trashed {
                    item.deleted = trashed;
                    scratch.mark(&key, [ChangeCategory::Trash]);
                }
                Ok(())
            }
            Mutation::MarkSynced { key, version } => {
                let item = scratch.item_mut(&self.items, &key)?;
                item.version = version;
                item.change_origin = ChangeOrigin::Sync;
                item.change_markers.clear();
                for field in item.fields.values_mut() {
                    field.changed = false;
                }
                scratch.set_origin(&key, ChangeOrigin::Sync);
                Ok(())
            }
            Mutation::SyncItem { item } => {
                let key = item.key.clone();
                let schema_known = self.collaborators.schema.fields_for_type(&item.item_type).is_some();
                if !schema_known {
                    warn!(item = %key, item_type = %item.item_type, "Synced item has an unknown type");
                }
                let local = scratch.items.get(&key).or_else(|| self.items.get(&key));
                let merged = reconcile::merge_server_item(local, item, schema_known);
                if self.items.contains_key(&key) || scratch.items.contains_key(&key) {
                    *scratch.item_mut(&self.items, &key)? = merged;
                } else {
                    scratch.insert_new(merged);
                }
                scratch.set_origin(&key, ChangeOrigin::Sync);
                Ok(())
            }
            Mutation::Batch { mutations } => {
                for mutation in mutations {
                    self.apply_mutation(scratch, mutation)?;
                }
                Ok(())
            }
        }
    }

    fn fields_for_type(&self, item_type: &str) -> Result<Vec<FieldDescriptor>> {
        self.collaborators
            .schema
            .fields_for_type(item_type)
            .ok_or_else(|| StoreError::TypeNotSupported(item_type.to_string()))
    }

    fn create_item(&self, scratch: &mut Scratch, mut item: Item, origin: ChangeOrigin) -> Result<()> {
        if scratch.contains(&self.items, &item.key) {
            return Err(StoreError::cant_create_data(format!("item {} already exists", item.key)));
        }
        let descriptors = self.fields_for_type(&item.item_type)?;

        for field in item.fields.values_mut() {
            let descriptor = descriptors
                .iter()
                .find(|d| d.key == field.key)
                .ok_or_else(|| StoreError::UnknownField {
                    field: field.key.clone(),
                    item_type: item.item_type.clone(),
                })?;
            field.base_key = descriptor.base_key.clone();
            field.changed = origin == ChangeOrigin::User && !field.is_empty();
        }
        for (index, creator) in item.creators.iter_mut().enumerate() {
            creator.order_index = index;
        }

        let key = item.key.clone();
        let mut categories = vec![ChangeCategory::Type];
        match origin {
            ChangeOrigin::User => {
                if item.fields.values().any(|field| !field.is_empty()) {
                    categories.push(ChangeCategory::Fields);
                }
                let populated = [
                    (!item.creators.is_empty(), ChangeCategory::Creators),
                    (!item.tags.is_empty(), ChangeCategory::Tags),
                    (!item.notes.is_empty(), ChangeCategory::Notes),
                    (item.parent_key.is_some(), ChangeCategory::Parent),
                    (!item.attachments.is_empty(), ChangeCategory::Attachments),
                    (item.annotations.iter().any(|a| !a.annotation_type.uses_paths()), ChangeCategory::Rects),
                    (item.annotations.iter().any(|a| a.annotation_type.uses_paths()), ChangeCategory::Paths),
                ];
                categories.extend(populated.into_iter().filter(|(set, _)| *set).map(|(_, c)| c));
                item.change_markers.clear();
                scratch.insert_new(item);
                scratch.mark(&key, categories);
            }
            ChangeOrigin::Sync => {
                item.change_markers.clear();
                item.change_origin = ChangeOrigin::Sync;
                scratch.insert_new(item);
                scratch.set_origin(&key, ChangeOrigin::Sync);
            }
        }
        debug!(item = %key, ?origin, "Item created");
        Ok(())
    }

    fn edit_field(&self, scratch: &mut Scratch, key: &str, field_key: &str, value: String) -> Result<()> {
        let item_type = scratch.item_mut(&self.items, key)?.item_type.clone();
        let descriptors = self.fields_for_type(&item_type)?;
        let descriptor = descriptors
            .iter()
            .find(|d| d.key == field_key || d.base_key.as_deref() == Some(field_key))
            .ok_or_else(|| StoreError::UnknownField {
                field: field_key.to_string(),
                item_type: item_type.clone(),
            })?;

        let (value, parsed_date) = if descriptor.is_date() {
            let today = chrono::Local::now().date_naive();
            let value = dates::resolve_shortcut(&value, today).unwrap_or(value);
            let parsed = self.collaborators.dates.parse(&value);
            (value, Some(parsed))
        } else {
            (value, None)
        };

        let item = scratch.item_mut(&self.items, key)?;
        let current = item.field_value(&descriptor.key).unwrap_or("");
        if current == value {
            return Ok(());
        }
        item.fields.insert(
            descriptor.key.clone(),
            Field {
                key: descriptor.key.clone(),
                base_key: descriptor.base_key.clone(),
                value,
                changed: true,
            },
        );
        if let Some(parsed) = parsed_date {
            item.parsed_date = parsed;
        }
        scratch.mark(key, [ChangeCategory::Fields]);
        Ok(())
    }

    fn page_info(&self, key: &str, page: u32) -> Result<PageInfo> {
        self.collaborators
            .pages
            .page_info(key, page)
            .ok_or_else(|| StoreError::PageUnavailable {
                document: key.to_string(),
                page,
            })
    }

    fn create_annotation(&self, scratch: &mut Scratch, key: &str, draft: AnnotationDraft) -> Result<()> {
        let page = self.page_info(key, draft.page)?;
        let shape = StorageShape::from_presentation(draft.annotation_type, &draft.rects, &draft.paths, &page)?;
        let glyphs = self.collaborators.pages.text_glyphs(key, draft.page);
        let sort_index = geometry::sort_index(draft.page, &shape.bounds, &page, &glyphs);

        let item = scratch.item_mut(&self.items, key)?;
        let annotation_key = draft.key.unwrap_or_else(generate_key);
        if item.annotation_index(&annotation_key).is_some() {
            return Err(StoreError::cant_create_data(format!(
                "annotation {} already exists",
                annotation_key
            )));
        }

        item.annotations.push(Annotation {
            key: annotation_key.clone(),
            annotation_type: draft.annotation_type,
            page: draft.page,
            rects: shape.rects,
            paths: shape.paths,
            color: draft.color,
            comment: draft.comment,
            text: draft.text,
            line_width: draft.line_width,
            sort_index,
            is_author: true,
        });
        item.annotations.sort_by(|a, b| a.sort_index.cmp(&b.sort_index));

        debug!(item = %key, annotation = %annotation_key, "Annotation created");
        scratch.mark(key, [shape_category(draft.annotation_type)]);
        Ok(())
    }

    fn edit_annotation(
        &self,
        scratch: &mut Scratch,
        key: &str,
        annotation_key: &str,
        edit: &AnnotationEdit,
    ) -> Result<()> {
        let (annotation_type, page_index) = {
            let item = scratch.item_mut(&self.items, key)?;
            let annotation = item
                .annotation_index(annotation_key)
                .map(|index| &item.annotations[index])
                .ok_or_else(|| StoreError::AnnotationNotFound(annotation_key.to_string()))?;
            if !annotation.is_author {
                return Err(StoreError::cant_create_data(format!(
                    "annotation {} belongs to another user",
                    annotation_key
                )));
            }
            (annotation.annotation_type, annotation.page)
        };

        let reshaped = match (annotation_type.uses_paths(), &edit.rects, &edit.paths) {
            (_, None, None) => None,
            (false, Some(rects), None) => Some((rects.as_slice(), &[][..])),
            (true, None, Some(paths)) => Some((&[][..], paths.as_slice())),
            _ => {
                return Err(StoreError::invalid_geometry(format!(
                    "{:?} annotations can't take this geometry",
                    annotation_type
                )))
            }
        };
        let reshaped = match reshaped {
            Some((rects, paths)) => {
                let page = self.page_info(key, page_index)?;
                let shape = StorageShape::from_presentation(annotation_type, rects, paths, &page)?;
                let glyphs = self.collaborators.pages.text_glyphs(key, page_index);
                let sort_index = geometry::sort_index(page_index, &shape.bounds, &page, &glyphs);
                Some((shape, sort_index))
            }
            None => None,
        };

        let item = scratch.item_mut(&self.items, key)?;
        let Some(index) = item.annotation_index(annotation_key) else {
            return Err(StoreError::AnnotationNotFound(annotation_key.to_string()));
        };
        let before = item.annotations[index].clone();
        let annotation = &mut item.annotations[index];
        if let Some(color) = &edit.color {
            annotation.color = color.clone();
        }
        if let Some(comment) = &edit.comment {
            annotation.comment = comment.clone();
        }
        let moved = reshaped.is_some();
        if let Some((shape, sort_index)) = reshaped {
            annotation.rects = shape.rects;
            annotation.paths = shape.paths;
            annotation.sort_index = sort_index;
        }
        if *annotation == before {
            return Ok(());
        }
        if moved {
            item.annotations.sort_by(|a, b| a.sort_index.cmp(&b.sort_index));
        }
        scratch.mark(key, [shape_category(annotation_type)]);
        Ok(())
    }

    pub(super) fn apply_location_event(
        &self,
        scratch: &mut Scratch,
        item_key: &str,
        attachment_key: &str,
        event: &LocationEvent,
    ) -> Result<()> {
        scratch.item_mut(&self.items, item_key)?;
        let item = scratch
            .items
            .get_mut(item_key)
            .ok_or_else(|| StoreError::ItemNotFound(item_key.to_string()))?;
        let index = item
            .attachment_index(attachment_key)
            .ok_or_else(|| StoreError::AttachmentNotFound(attachment_key.to_string()))?;

        let transition = scratch.lifecycle.apply(&mut item.attachments[index], event)?;

        if transition.notify {
            scratch
                .notify
                .entry(item_key.to_string())
                .or_default()
                .insert(index);
        }
        if let Some(job) = transition.extraction {
            scratch.extractions.insert(item_key.to_string(), job);
        }
        if let Some(error) = transition.failure {
            scratch.failures.insert(item_key.to_string(), error);
        }
        Ok(())
    }

    fn add_attachments(&self, scratch: &mut Scratch, key: &str, imports: Vec<AttachmentImport>) -> Result<()> {
        scratch.item_mut(&self.items, key)?;
        let files = &self.collaborators.files;
        let mut added = Vec::new();
        let mut failed = 0usize;

        for import in imports {
            let Some(file_name) = import.source.file_name() else {
                warn!(source = ?import.source, "Attachment source has no file name");
                failed += 1;
                continue;
            };
            let attachment_key = generate_key();
            let directory = self.config.attachment_dir(&attachment_key);
            let destination = directory.join(file_name);

            let moved = files
                .create_directories(&directory)
                .and_then(|_| files.move_file(&import.source, &destination));
            match moved {
                Ok(()) => added.push(AttachmentLifecycle::imported(attachment_key, import.title, destination)),
                Err(e) => {
                    warn!(source = ?import.source, error = %e, "Failed to copy attachment into storage");
                    failed += 1;
                }
            }
        }

        if added.is_empty() {
            return if failed > 0 {
                Err(StoreError::FileNotCopied(failed))
            } else {
                Ok(())
            };
        }

        let item = scratch.item_mut(&self.items, key)?;
        item.attachments.extend(added);
        item.attachments
            .sort_by_cached_key(|attachment| attachment.title.to_lowercase());
        if failed > 0 {
            scratch
                .failures
                .insert(key.to_string(), StoreError::FileNotCopied(failed));
        }
        scratch.mark(key, [ChangeCategory::Attachments]);
        Ok(())
    }

    fn change_type(&self, scratch: &mut Scratch, key: &str, item_type: &str, accept_dropped: bool) -> Result<()> {
        let descriptors = self.fields_for_type(item_type)?;
        let item = scratch.item_mut(&self.items, key)?;
        if item.item_type == item_type {
            return Ok(());
        }

        let mut fields = std::collections::BTreeMap::new();
        let mut dropped = Vec::new();
        for field in item.fields.values() {
            let target = descriptors.iter().find(|descriptor| {
                descriptor.is_equivalent(&field.key, field.base_key.as_deref())
                    && !fields.contains_key(&descriptor.key)
            });
            match target {
                Some(descriptor) => {
                    let changed = field.changed || descriptor.key != field.key;
                    fields.insert(
                        descriptor.key.clone(),
                        Field {
                            key: descriptor.key.clone(),
                            base_key: descriptor.base_key.clone(),
                            value: field.value.clone(),
                            changed,
                        },
                    );
                }
                None if !field.is_empty() => dropped.push(field.key.clone()),
                None => {}
            }
        }

        if !dropped.is_empty() && !accept_dropped {
            debug!(item = %key, ?dropped, "Type change would drop fields");
            return Err(StoreError::DroppedFieldsOnTypeChange(dropped));
        }

        if !descriptors.iter().any(FieldDescriptor::is_date) {
            item.parsed_date = None;
        }
        item.item_type = item_type.to_string();
        item.fields = fields;
        scratch.mark(key, [ChangeCategory::Type, ChangeCategory::Fields]);
        Ok(())
    }
}

/// Storage-space geometry of one annotation
struct StorageShape {
    rects: Vec<Rect>,
    paths: Vec<Vec<Point>>,
    bounds: Rect,
}

impl StorageShape {
    fn from_presentation(
        annotation_type: AnnotationType,
        rects: &[Rect],
        paths: &[Vec<Point>],
        page: &PageInfo,
    ) -> Result<Self> {
        annotation_type.validate_geometry(rects, paths)?;

        if annotation_type.uses_paths() {
            let paths: Vec<Vec<Point>> = paths
                .iter()
                .map(|path| geometry::path_to_storage(path, page))
                .collect();
            let bounds = Rect::bounding_paths(&paths)
                .ok_or_else(|| StoreError::invalid_geometry("annotation has no points"))?;
            Ok(Self {
                rects: Vec::new(),
                paths,
                bounds,
            })
        } else {
            let rects: Vec<Rect> = rects.iter().map(|rect| geometry::to_storage(rect, page)).collect();
            let bounds = Rect::bounding(&rects)
                .ok_or_else(|| StoreError::invalid_geometry("annotation has no rects"))?;
            Ok(Self {
                rects,
                paths: Vec::new(),
                bounds,
            })
        }
    }
}

fn shape_category(annotation_type: AnnotationType) -> ChangeCategory {
    if annotation_type.uses_paths() {
        ChangeCategory::Paths
    } else {
        ChangeCategory::Rects
    }
}
