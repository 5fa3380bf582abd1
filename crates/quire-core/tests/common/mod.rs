#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate};
use quire_core::collaborators::FieldDescriptor;
use quire_core::dates::StructuredDate;
use quire_core::geometry::{GlyphFrame, Rotation, Size};
use quire_core::{
    ChangeOrigin, Collaborators, Config, DateParser, FileStorage, Item, Mutation, PageInfo,
    PageInfoProvider, SchemaProvider, Store,
};

/// File system kept in a set of paths
#[derive(Default)]
pub struct MemoryFiles {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFiles {
    pub fn with_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: Mutex::new(paths.into_iter().map(Into::into).collect()),
        }
    }

    pub fn add(&self, path: impl Into<PathBuf>) {
        self.paths.lock().unwrap().insert(path.into());
    }

    pub fn delete(&self, path: &Path) {
        self.paths.lock().unwrap().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().unwrap().contains(path)
    }
}

impl FileStorage for MemoryFiles {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut paths = self.paths.lock().unwrap();
        if !paths.remove(from) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        paths.insert(to.to_path_buf());
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.paths.lock().unwrap().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.contains(path)
    }

    fn create_directories(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn is_archive(&self, path: &Path) -> bool {
        path.extension().map_or(false, |ext| ext == "zip")
    }

    fn unzip(&self, archive: &Path, destination: &Path) -> io::Result<()> {
        if !self.contains(archive) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such archive"));
        }
        self.add(destination.join("index.html"));
        Ok(())
    }
}

/// Two item types: `book` has a publisher, `document` doesn't
pub struct TestSchema;

impl SchemaProvider for TestSchema {
    fn fields_for_type(&self, item_type: &str) -> Option<Vec<FieldDescriptor>> {
        let keys: &[&str] = match item_type {
            "book" => &["title", "date", "publisher", "place"],
            "document" => &["title", "date", "place"],
            _ => return None,
        };
        Some(keys.iter().map(|key| FieldDescriptor::new(*key)).collect())
    }

    fn localized_label(&self, item_type: &str) -> Option<String> {
        Some(item_type.to_string())
    }

    fn localized_creator_label(&self, creator_type: &str) -> Option<String> {
        Some(creator_type.to_string())
    }
}

/// Understands ISO dates only
pub struct IsoDates;

impl DateParser for IsoDates {
    fn parse(&self, value: &str) -> Option<StructuredDate> {
        let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
        Some(StructuredDate {
            year: Some(date.year()),
            month: Some(date.month()),
            day: Some(date.day()),
            order: "ymd".to_string(),
        })
    }
}

/// US Letter pages without extractable text
pub struct LetterPages {
    pub rotation: Rotation,
}

impl PageInfoProvider for LetterPages {
    fn page_info(&self, _document_key: &str, _page: u32) -> Option<PageInfo> {
        Some(PageInfo::new(Size::new(612.0, 792.0), self.rotation))
    }

    fn text_glyphs(&self, _document_key: &str, _page: u32) -> Vec<GlyphFrame> {
        Vec::new()
    }
}

pub fn collaborators(files: Arc<MemoryFiles>) -> Collaborators {
    Collaborators {
        files,
        schema: Arc::new(TestSchema),
        dates: Arc::new(IsoDates),
        pages: Arc::new(LetterPages {
            rotation: Rotation::Deg0,
        }),
    }
}

pub fn test_config() -> Config {
    Config::with_data_dir("/library")
}

pub fn memory_store(files: Arc<MemoryFiles>) -> Store {
    Store::open_in_memory(test_config(), collaborators(files)).unwrap()
}

/// Insert an item as if it came from the server, so it starts clean
pub fn seed_synced(store: &mut Store, item: Item) {
    store
        .apply(Mutation::CreateItem {
            item,
            origin: ChangeOrigin::Sync,
        })
        .unwrap();
}
