//! Catalog: schema management for relations
//!
//! Tracks schemas (column names, scalar types, and backing column files) for
//! all relations known to the engine. Used by the plan builder to resolve
//! relation and column names, and by the scan translator to locate the
//! column files of a relation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plan::ScalarType;

/// Opaque relation identifier. Equality-comparable only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub(crate) u32);

/// Opaque column identifier, scoped to its table. Equality-comparable only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub(crate) u32);

/// A single column of a registered relation.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub name: String,
    pub ty: ScalarType,
    /// Backing flat file. Numeric columns: one file of fixed-width
    /// little-endian elements. Text columns: this is the data blob and
    /// `offsets_path` holds the (offset, length) u32 pairs.
    pub path: PathBuf,
    pub offsets_path: Option<PathBuf>,
}

/// A registered relation and its columns, in declaration order.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Catalog tracks schemas for all relations
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Vec<TableInfo>,
    by_name: HashMap<String, TableId>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Catalog {
            tables: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a relation with its columns. Replaces any previous relation
    /// of the same name.
    pub fn register_table(
        &mut self,
        name: &str,
        columns: Vec<(String, ScalarType, PathBuf)>,
    ) -> TableId {
        let id = TableId(self.tables.len() as u32);
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, (col_name, ty, path))| {
                let offsets_path = match ty {
                    ScalarType::Text => Some(offsets_path_for(&path)),
                    _ => None,
                };
                ColumnInfo {
                    id: ColumnId(i as u32),
                    name: col_name,
                    ty,
                    path,
                    offsets_path,
                }
            })
            .collect();

        self.tables.push(TableInfo {
            id,
            name: name.to_string(),
            columns,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Check if a relation exists
    pub fn has_table(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Resolve a relation name to its id
    pub fn resolve(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).copied()
    }

    /// Get a relation by id
    pub fn table(&self, id: TableId) -> &TableInfo {
        &self.tables[id.0 as usize]
    }

    /// Get a relation by name
    pub fn table_by_name(&self, name: &str) -> Option<&TableInfo> {
        self.resolve(name).map(|id| self.table(id))
    }

    /// All registered relation names
    pub fn all_tables(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Iterate all registered relations in registration order
    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.iter()
    }
}

/// Offsets-table path convention for text columns: `<data path>.off`.
pub fn offsets_path_for(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_os_string();
    s.push(".off");
    PathBuf::from(s)
}
