//! Catalog metadata: columns, tables, indexes, and the database blob.
//!
//! The whole catalog serializes as one JSON document (`db.meta`),
//! rewritten on every DDL statement. Maps are `BTreeMap`s so the
//! serialized form and every iteration order are deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sable_common::{SableError, SableResult};
use sable_storage::{KeyColumn, KeyKind, KeySchema};

use crate::value::ColType;

/// Metadata of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    /// Owning table.
    pub table: String,
    /// Column name.
    pub name: String,
    /// Column type.
    pub col_type: ColType,
    /// Field width in bytes.
    pub len: usize,
    /// Byte offset within the record.
    pub offset: usize,
    /// Whether some index covers this column.
    pub has_index: bool,
}

/// Metadata of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Indexed table.
    pub table: String,
    /// Total key width: the sum of the key columns' widths.
    pub col_tot_len: usize,
    /// Key columns in declared order.
    pub cols: Vec<ColMeta>,
}

impl IndexMeta {
    /// Extracts this index's key from a record.
    pub fn key_of(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.col_tot_len);
        for col in &self.cols {
            key.extend_from_slice(&record[col.offset..col.offset + col.len]);
        }
        key
    }

    /// The storage-level key layout of this index.
    pub fn key_schema(&self) -> KeySchema {
        KeySchema::new(
            self.cols
                .iter()
                .map(|c| {
                    let kind = match c.col_type {
                        ColType::Int => KeyKind::Int,
                        ColType::Float => KeyKind::Float,
                        ColType::Char => KeyKind::Bytes,
                    };
                    KeyColumn::new(kind, c.len)
                })
                .collect(),
        )
    }

    /// The key column names in order.
    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }
}

/// Metadata of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TabMeta {
    /// Table name.
    pub name: String,
    /// Columns in declared order.
    pub cols: Vec<ColMeta>,
    /// Indexes by name.
    pub indexes: BTreeMap<String, IndexMeta>,
}

impl TabMeta {
    /// Returns true if the table has a column of this name.
    pub fn is_col(&self, name: &str) -> bool {
        self.cols.iter().any(|c| c.name == name)
    }

    /// Looks up a column by name.
    pub fn get_col(&self, name: &str) -> SableResult<&ColMeta> {
        self.cols
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SableError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    /// Record width: the sum of all column widths.
    pub fn record_size(&self) -> usize {
        self.cols.iter().map(|c| c.len).sum()
    }

    /// Looks up the index over exactly these columns, in order.
    pub fn get_index_meta(&self, col_names: &[String]) -> Option<&IndexMeta> {
        self.indexes.get(&index_name(&self.name, col_names))
    }

    /// Recomputes `has_index` flags from the index map.
    pub fn refresh_index_flags(&mut self) {
        for col in &mut self.cols {
            col.has_index = false;
        }
        let indexed: Vec<String> = self
            .indexes
            .values()
            .flat_map(|ix| ix.cols.iter().map(|c| c.name.clone()))
            .collect();
        for col in &mut self.cols {
            if indexed.contains(&col.name) {
                col.has_index = true;
            }
        }
    }
}

/// The persisted database catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DbMeta {
    /// Database name.
    pub name: String,
    /// Tables by name.
    pub tables: BTreeMap<String, TabMeta>,
}

impl DbMeta {
    /// Returns true if the database has a table of this name.
    pub fn is_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Looks up a table by name.
    pub fn get_table(&self, name: &str) -> SableResult<&TabMeta> {
        self.tables
            .get(name)
            .ok_or_else(|| SableError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Looks up a table for mutation.
    pub fn get_table_mut(&mut self, name: &str) -> SableResult<&mut TabMeta> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SableError::TableNotFound {
                table: name.to_string(),
            })
    }
}

/// Deterministic index name for `(table, columns)`.
pub fn index_name(table: &str, col_names: &[impl AsRef<str>]) -> String {
    let mut name = String::from(table);
    for col in col_names {
        name.push('_');
        name.push_str(col.as_ref());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TabMeta {
        let cols = vec![
            ColMeta {
                table: "t".into(),
                name: "id".into(),
                col_type: ColType::Int,
                len: 4,
                offset: 0,
                has_index: false,
            },
            ColMeta {
                table: "t".into(),
                name: "name".into(),
                col_type: ColType::Char,
                len: 8,
                offset: 4,
                has_index: false,
            },
        ];
        TabMeta {
            name: "t".into(),
            cols,
            indexes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_index_name_is_deterministic() {
        assert_eq!(index_name("t", &["id"]), "t_id");
        assert_eq!(index_name("t", &["a", "b"]), "t_a_b");
    }

    #[test]
    fn test_record_size() {
        assert_eq!(sample_table().record_size(), 12);
    }

    #[test]
    fn test_key_of_concatenates_fields() {
        let tab = sample_table();
        let meta = IndexMeta {
            table: "t".into(),
            col_tot_len: 12,
            cols: vec![tab.cols[1].clone(), tab.cols[0].clone()],
        };
        let mut record = vec![0u8; 12];
        record[0..4].copy_from_slice(&7i32.to_le_bytes());
        record[4..8].copy_from_slice(b"ab\0\0");
        let key = meta.key_of(&record);
        assert_eq!(&key[0..8], b"ab\0\0\0\0\0\0");
        assert_eq!(&key[8..12], &7i32.to_le_bytes());
    }

    #[test]
    fn test_meta_json_round_trip() {
        let mut db = DbMeta {
            name: "testdb".into(),
            tables: BTreeMap::new(),
        };
        db.tables.insert("t".into(), sample_table());

        let json = serde_json::to_string_pretty(&db).unwrap();
        let back: DbMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(db, back);
    }

    #[test]
    fn test_refresh_index_flags() {
        let mut tab = sample_table();
        let meta = IndexMeta {
            table: "t".into(),
            col_tot_len: 4,
            cols: vec![tab.cols[0].clone()],
        };
        tab.indexes.insert(index_name("t", &["id"]), meta);
        tab.refresh_index_flags();
        assert!(tab.get_col("id").unwrap().has_index);
        assert!(!tab.get_col("name").unwrap().has_index);
    }
}
