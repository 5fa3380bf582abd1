//! SQLite persistence for items
//!
//! Storage location: `~/.local/share/quire/quire.db` (configurable via `Config`)
//!
//! Writes are batched into one transaction so a multi-item change either
//! lands completely or not at all.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::config::Config;
use crate::models::Item;

/// Item table backed by SQLite
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the SQLite database
    pub fn open(config: &Config) -> StorageResult<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened item database at {:?}", path);
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Load every stored item, ordered by key
    pub fn load_all(&self) -> StorageResult<Vec<Item>> {
        let mut stmt = self.conn.prepare("SELECT key, data FROM items ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, data)| {
                serde_json::from_str(&data).map_err(|e| StorageError::CorruptRecord {
                    key,
                    details: e.to_string(),
                })
            })
            .collect()
    }

    /// Write `items` in a single transaction
    pub fn save_items(&mut self, items: &[&Item]) -> StorageResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for item in items {
            upsert_item(&tx, item)?;
        }
        tx.commit()?;
        debug!(count = items.len(), "Persisted items");
        Ok(())
    }

    /// Number of stored items
    pub fn item_count(&self) -> StorageResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?)
    }

    /// Keys of items with unsynced local changes
    pub fn changed_keys(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM items WHERE has_changes = 1 ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

fn upsert_item(tx: &Transaction, item: &Item) -> StorageResult<()> {
    let data = serde_json::to_string(item)?;
    tx.execute(
        r#"
        INSERT INTO items (key, library_id, item_type, version, deleted, has_changes, data, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(key) DO UPDATE SET
            library_id = excluded.library_id,
            item_type = excluded.item_type,
            version = excluded.version,
            deleted = excluded.deleted,
            has_changes = excluded.has_changes,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
        params![
            item.key,
            item.library_id,
            item.item_type,
            item.version as i64,
            item.deleted,
            item.has_local_changes(),
            data,
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}
