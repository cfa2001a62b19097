//! System manager: database lifecycle and DDL.
//!
//! Owns the catalog plus the open heap and index handles. All methods
//! that mutate the catalog finish with [`SystemManager::flush_meta`],
//! so an error mid-operation leaves the persisted catalog unchanged.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use sable_common::config::EngineConfig;
use sable_common::constants::{DB_META_NAME, HEAP_FILE_SUFFIX, INDEX_FILE_SUFFIX, LOG_FILE_NAME};
use sable_common::{SableError, SableResult};
use sable_storage::{BTreeIndex, BufferPool, DiskManager, RecordFile};

use crate::catalog::{index_name, ColMeta, DbMeta, IndexMeta, TabMeta};
use crate::parser::ColumnDef;

/// The system manager of one open database.
pub struct SystemManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    /// The in-memory catalog.
    pub db: DbMeta,
    heaps: HashMap<String, Arc<RecordFile>>,
    indexes: HashMap<String, Arc<BTreeIndex>>,
}

impl SystemManager {
    /// Creates a new database directory with an empty catalog and log.
    pub fn create_db(path: &Path) -> SableResult<()> {
        if path.is_dir() {
            return Err(SableError::DatabaseExists {
                name: path.display().to_string(),
            });
        }
        std::fs::create_dir_all(path)?;
        let meta = DbMeta {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            tables: Default::default(),
        };
        write_meta(path, &meta)?;
        std::fs::File::create(path.join(LOG_FILE_NAME))?;
        info!(db = %path.display(), "created database");
        Ok(())
    }

    /// Removes a database directory and everything in it.
    pub fn drop_db(path: &Path) -> SableResult<()> {
        if !path.is_dir() {
            return Err(SableError::DatabaseNotFound {
                name: path.display().to_string(),
            });
        }
        std::fs::remove_dir_all(path)?;
        info!(db = %path.display(), "dropped database");
        Ok(())
    }

    /// Opens an existing database directory, loading the catalog and
    /// every table and index file.
    pub fn open_db(path: &Path, config: &EngineConfig) -> SableResult<Self> {
        if !path.is_dir() {
            return Err(SableError::DatabaseNotFound {
                name: path.display().to_string(),
            });
        }
        config
            .validate()
            .map_err(SableError::internal)?;

        let text = std::fs::read_to_string(path.join(DB_META_NAME))?;
        let db: DbMeta = serde_json::from_str(&text)
            .map_err(|e| SableError::internal(format!("corrupt catalog: {e}")))?;

        let disk = Arc::new(DiskManager::new(path));
        let pool = Arc::new(BufferPool::new(config, Arc::clone(&disk)));

        let mut sys = Self {
            disk,
            pool,
            db,
            heaps: HashMap::new(),
            indexes: HashMap::new(),
        };
        for (name, tab) in sys.db.tables.clone() {
            let heap =
                RecordFile::open(&sys.disk, Arc::clone(&sys.pool), &heap_file(&name))?;
            sys.heaps.insert(name.clone(), Arc::new(heap));
            for (ix_name, ix_meta) in &tab.indexes {
                let index = BTreeIndex::open(
                    &sys.disk,
                    Arc::clone(&sys.pool),
                    &index_file(ix_name),
                    ix_meta.key_schema(),
                )?;
                sys.indexes.insert(ix_name.clone(), Arc::new(index));
            }
        }
        info!(db = %path.display(), tables = sys.db.tables.len(), "opened database");
        Ok(sys)
    }

    /// Flushes every dirty page and the catalog, and closes all files.
    pub fn close_db(&mut self) -> SableResult<()> {
        self.pool.flush_all()?;
        self.flush_meta()?;
        for heap in self.heaps.values() {
            self.disk.close_file(heap.file_id())?;
        }
        for index in self.indexes.values() {
            self.disk.close_file(index.file_id())?;
        }
        self.heaps.clear();
        self.indexes.clear();
        Ok(())
    }

    /// Rewrites the persisted catalog in one whole-file overwrite.
    pub fn flush_meta(&self) -> SableResult<()> {
        write_meta(self.disk.root(), &self.db)
    }

    /// Flushes all data pages and the catalog without closing.
    pub fn checkpoint(&self) -> SableResult<()> {
        self.flush_meta()?;
        self.pool.flush_all()?;
        for heap in self.heaps.values() {
            self.disk.sync_file(heap.file_id())?;
        }
        for index in self.indexes.values() {
            self.disk.sync_file(index.file_id())?;
        }
        Ok(())
    }

    // =========================================================================
    // DDL
    // =========================================================================

    /// Creates a table and its heap file.
    pub fn create_table(&mut self, name: &str, columns: &[ColumnDef]) -> SableResult<()> {
        if self.db.is_table(name) {
            return Err(SableError::TableExists {
                table: name.to_string(),
            });
        }
        let mut offset = 0;
        let mut cols = Vec::with_capacity(columns.len());
        for def in columns {
            cols.push(ColMeta {
                table: name.to_string(),
                name: def.name.clone(),
                col_type: def.col_type,
                len: def.len,
                offset,
                has_index: false,
            });
            offset += def.len;
        }
        let tab = TabMeta {
            name: name.to_string(),
            cols,
            indexes: Default::default(),
        };

        RecordFile::create(&self.disk, &heap_file(name), tab.record_size())?;
        let heap = RecordFile::open(&self.disk, Arc::clone(&self.pool), &heap_file(name))?;
        self.heaps.insert(name.to_string(), Arc::new(heap));
        self.db.tables.insert(name.to_string(), tab);
        self.flush_meta()?;
        debug!(table = name, "created table");
        Ok(())
    }

    /// Drops a table, its heap file, and every index over it.
    pub fn drop_table(&mut self, name: &str) -> SableResult<()> {
        let tab = self.db.get_table(name)?.clone();
        for ix_name in tab.indexes.keys() {
            self.remove_index_file(ix_name)?;
        }
        let heap = self
            .heaps
            .remove(name)
            .ok_or_else(|| SableError::internal(format!("no heap handle for '{name}'")))?;
        self.pool.evict_file(heap.file_id())?;
        self.disk.close_file(heap.file_id())?;
        self.disk.remove_file(&heap_file(name))?;
        self.db.tables.remove(name);
        self.flush_meta()?;
        debug!(table = name, "dropped table");
        Ok(())
    }

    /// Creates an index and back-fills it from the table. A duplicate
    /// key aborts the operation and destroys the partial index.
    pub fn create_index(&mut self, table: &str, col_names: &[String]) -> SableResult<()> {
        let tab = self.db.get_table(table)?;
        let ix_name = index_name(table, col_names);
        if tab.indexes.contains_key(&ix_name) {
            return Err(SableError::IndexExists {
                table: table.to_string(),
                columns: col_names.join(","),
            });
        }
        let mut cols = Vec::with_capacity(col_names.len());
        for col_name in col_names {
            cols.push(tab.get_col(col_name)?.clone());
        }
        let meta = IndexMeta {
            table: table.to_string(),
            col_tot_len: cols.iter().map(|c| c.len).sum(),
            cols,
        };

        BTreeIndex::create(&self.disk, &index_file(&ix_name), &meta.key_schema())?;
        let index = Arc::new(BTreeIndex::open(
            &self.disk,
            Arc::clone(&self.pool),
            &index_file(&ix_name),
            meta.key_schema(),
        )?);

        // Back-fill from the heap; the index is unique, so any repeated
        // key aborts the build.
        let heap = self.heap(table)?;
        for rid in heap.scan() {
            let rid = rid?;
            let record = heap.get(rid)?;
            let key = meta.key_of(&record);
            if !index.insert(&key, rid)? {
                self.pool.evict_file(index.file_id())?;
                self.disk.close_file(index.file_id())?;
                self.disk.remove_file(&index_file(&ix_name))?;
                return Err(SableError::DuplicateKey { index: ix_name });
            }
        }

        self.indexes.insert(ix_name.clone(), index);
        let tab = self.db.get_table_mut(table)?;
        tab.indexes.insert(ix_name.clone(), meta);
        tab.refresh_index_flags();
        self.flush_meta()?;
        debug!(index = %ix_name, "created index");
        Ok(())
    }

    /// Drops an index and its file.
    pub fn drop_index(&mut self, table: &str, col_names: &[String]) -> SableResult<()> {
        let ix_name = index_name(table, col_names);
        if !self.db.get_table(table)?.indexes.contains_key(&ix_name) {
            return Err(SableError::IndexNotFound {
                table: table.to_string(),
                columns: col_names.join(","),
            });
        }
        self.remove_index_file(&ix_name)?;
        let tab = self.db.get_table_mut(table)?;
        tab.indexes.remove(&ix_name);
        tab.refresh_index_flags();
        self.flush_meta()?;
        debug!(index = %ix_name, "dropped index");
        Ok(())
    }

    fn remove_index_file(&mut self, ix_name: &str) -> SableResult<()> {
        let index = self
            .indexes
            .remove(ix_name)
            .ok_or_else(|| SableError::internal(format!("no index handle for '{ix_name}'")))?;
        self.pool.evict_file(index.file_id())?;
        self.disk.close_file(index.file_id())?;
        self.disk.remove_file(&index_file(ix_name))?;
        Ok(())
    }

    // =========================================================================
    // Handles and statistics
    // =========================================================================

    /// The heap of a table.
    pub fn heap(&self, table: &str) -> SableResult<Arc<RecordFile>> {
        self.heaps
            .get(table)
            .cloned()
            .ok_or_else(|| SableError::TableNotFound {
                table: table.to_string(),
            })
    }

    /// An index handle by index name.
    pub fn index(&self, ix_name: &str) -> SableResult<Arc<BTreeIndex>> {
        self.indexes
            .get(ix_name)
            .cloned()
            .ok_or_else(|| SableError::internal(format!("no index handle for '{ix_name}'")))
    }

    /// Live row count of a table, used as its cardinality estimate.
    pub fn table_cardinality(&self, table: &str) -> usize {
        self.heaps
            .get(table)
            .map(|h| h.num_records() as usize)
            .unwrap_or(0)
            .max(1)
    }
}

impl std::fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemManager")
            .field("db", &self.db.name)
            .field("tables", &self.db.tables.len())
            .field("indexes", &self.indexes.len())
            .finish()
    }
}

fn heap_file(table: &str) -> String {
    format!("{table}{HEAP_FILE_SUFFIX}")
}

fn index_file(ix_name: &str) -> String {
    format!("{ix_name}{INDEX_FILE_SUFFIX}")
}

/// Writes the catalog blob atomically: serialize to a temp file in the
/// same directory, then rename over the old one.
fn write_meta(dir: &Path, meta: &DbMeta) -> SableResult<()> {
    let text = serde_json::to_string_pretty(meta)
        .map_err(|e| SableError::internal(format!("catalog serialization: {e}")))?;
    let tmp = dir.join(format!("{DB_META_NAME}.tmp"));
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, dir.join(DB_META_NAME))?;
    Ok(())
}
