//! Shared table metadata cache.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use super::schema::{unquote, SchemaError, TableMeta};
use crate::sql::DbType;

type CacheKey = (DbType, String);

/// Caches table metadata per `(dialect, table)`.
///
/// Each table gets one slot. The first caller to reach an empty slot runs the
/// loader while concurrent callers for the same table block on the slot and
/// reuse its result. A failed load leaves the slot empty so a later call can
/// retry. Entries are never mutated after a successful load.
#[derive(Default)]
pub struct TableMetaCache {
    slots: RwLock<HashMap<CacheKey, Arc<OnceCell<Arc<TableMeta>>>>>,
}

impl TableMetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cached metadata, loading it with `load` on first use.
    pub fn get_or_load<F>(
        &self,
        db_type: DbType,
        table: &str,
        load: F,
    ) -> Result<Arc<TableMeta>, SchemaError>
    where
        F: FnOnce() -> Result<TableMeta, SchemaError>,
    {
        let slot = self.slot(db_type, table);
        slot.get_or_try_init(|| {
            tracing::debug!(table, %db_type, "loading table metadata");
            let meta = load()?;
            meta.validate()?;
            Ok(Arc::new(meta))
        })
        .cloned()
    }

    /// Get metadata only if it has already been loaded.
    pub fn get(&self, db_type: DbType, table: &str) -> Option<Arc<TableMeta>> {
        let key = Self::key(db_type, table);
        self.slots
            .read()
            .get(&key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of tables with loaded metadata.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, db_type: DbType, table: &str) -> Arc<OnceCell<Arc<TableMeta>>> {
        let key = Self::key(db_type, table);
        if let Some(slot) = self.slots.read().get(&key) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn key(db_type: DbType, table: &str) -> CacheKey {
        (db_type, unquote(table).to_ascii_lowercase())
    }
}

impl std::fmt::Debug for TableMetaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetaCache")
            .field("loaded", &self.len())
            .finish()
    }
}
