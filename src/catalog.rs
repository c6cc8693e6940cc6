//! The catalog contract (spec §6): an external component this engine only
//! consumes through a trait. It is the catalog's job to track which schema
//! version a table is currently on, to hand back the attribute list that was
//! live at some past version (for translating older records on read), to
//! stamp system columns onto freshly inserted tuples, and to say which
//! tables are catalog-internal bookkeeping and therefore exempt from version
//! translation.
//!
//! [`InMemoryCatalog`] is a reference implementation good enough for tests
//! and for embedding this engine without a real external catalog; it models
//! its own bookkeeping the way a `Tables`/`Columns` system-catalog pair
//! would, grounded on the teacher's `src/storage/catalog/mod.rs` (`Dict`) —
//! a small struct opened once and consulted through lookup methods for the
//! rest of its life — translated into a `Catalog` trait plus an in-memory
//! `RwLock<HashMap<...>>` reference implementation, since the base spec
//! treats the catalog as an external collaborator reachable only through a
//! contract (§1), not a concrete page-backed store like the teacher's.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{Attribute, AttrType, Descriptor, Tuple};

/// External schema/version authority a record file consults for anything it
/// cannot determine from the bytes on disk alone.
pub trait Catalog: Send + Sync {
    /// The schema version a table is currently on.
    fn current_version(&self, table: &str) -> Result<u16>;

    /// The attribute list that was live for `table` at `version`.
    fn attributes_for(&self, table: &str, version: u16) -> Result<Descriptor>;

    /// Called after encoding but before storing a freshly inserted tuple, to
    /// let the catalog stamp system columns (e.g. a creation version). The
    /// default implementation does nothing.
    fn stamp_on_insert(&self, _table: &str, _tuple: &mut Tuple, _attributes: &Descriptor) {}

    /// Whether `table` is one of the catalog's own backing files, which must
    /// not be subjected to version translation (the catalog IS the source of
    /// version information and cannot consult itself).
    fn is_system(&self, table: &str) -> bool;
}

#[derive(Debug, Clone)]
struct TableEntry {
    current_version: u16,
    versions: HashMap<u16, Descriptor>,
}

/// A catalog held entirely in memory, bookkeeping tables the way a
/// `Tables`/`Columns` pair would without needing its own backing record
/// files. Good for tests and for embedders that manage schema externally.
pub struct InMemoryCatalog {
    tables: RwLock<HashMap<String, TableEntry>>,
    system_tables: Vec<String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            system_tables: vec!["Tables".to_string(), "Columns".to_string()],
        }
    }

    /// Register a table's version-1 attribute list. Subsequent
    /// [`InMemoryCatalog::evolve`] calls add later versions.
    pub fn register(&self, table: impl Into<String>, attributes: Descriptor) {
        let mut tables = self.tables.write().unwrap();
        let mut versions = HashMap::new();
        versions.insert(1, attributes);
        tables.insert(
            table.into(),
            TableEntry {
                current_version: 1,
                versions,
            },
        );
    }

    /// Record a new schema version for `table`, becoming its current one.
    pub fn evolve(&self, table: &str, attributes: Descriptor) -> Result<u16> {
        let mut tables = self.tables.write().unwrap();
        let entry = tables
            .get_mut(table)
            .ok_or(Error::NotFound("table"))?;
        entry.current_version += 1;
        entry.versions.insert(entry.current_version, attributes);
        Ok(entry.current_version)
    }

    pub fn current_schema(&self, table: &str) -> Result<(u16, Descriptor)> {
        let tables = self.tables.read().unwrap();
        let entry = tables.get(table).ok_or(Error::NotFound("table"))?;
        Ok((
            entry.current_version,
            entry.versions[&entry.current_version].clone(),
        ))
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for InMemoryCatalog {
    fn current_version(&self, table: &str) -> Result<u16> {
        let tables = self.tables.read().unwrap();
        tables
            .get(table)
            .map(|e| e.current_version)
            .ok_or(Error::NotFound("table"))
    }

    fn attributes_for(&self, table: &str, version: u16) -> Result<Descriptor> {
        let tables = self.tables.read().unwrap();
        let entry = tables.get(table).ok_or(Error::NotFound("table"))?;
        entry
            .versions
            .get(&version)
            .cloned()
            .ok_or(Error::NotFound("schema version"))
    }

    fn is_system(&self, table: &str) -> bool {
        self.system_tables.iter().any(|t| t == table)
    }
}

/// The attribute list of the catalog's own `Tables` system table, for
/// embedders that want to back it with a real [`crate::record::RecordFile`].
pub fn tables_system_descriptor() -> Descriptor {
    vec![
        Attribute::new("table_name", AttrType::Varchar, 64),
        Attribute::new("file_name", AttrType::Varchar, 64),
        Attribute::new("current_version", AttrType::Int, 4),
    ]
}

/// The attribute list of the catalog's own `Columns` system table.
pub fn columns_system_descriptor() -> Descriptor {
    vec![
        Attribute::new("table_name", AttrType::Varchar, 64),
        Attribute::new("version", AttrType::Int, 4),
        Attribute::new("column_name", AttrType::Varchar, 64),
        Attribute::new("column_type", AttrType::Int, 4),
        Attribute::new("column_length", AttrType::Int, 4),
        Attribute::new("position", AttrType::Int, 4),
        Attribute::new("valid", AttrType::Int, 4),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttrType;

    #[test]
    fn evolve_adds_a_translatable_version() {
        let cat = InMemoryCatalog::new();
        cat.register("widgets", vec![Attribute::new("id", AttrType::Int, 4)]);
        let v2 = cat
            .evolve(
                "widgets",
                vec![
                    Attribute::new("id", AttrType::Int, 4),
                    Attribute::new("label", AttrType::Varchar, 16),
                ],
            )
            .unwrap();
        assert_eq!(v2, 2);
        assert_eq!(cat.current_version("widgets").unwrap(), 2);
        let v1_attrs = cat.attributes_for("widgets", 1).unwrap();
        assert_eq!(v1_attrs.len(), 1);
    }

    #[test]
    fn system_tables_are_flagged() {
        let cat = InMemoryCatalog::new();
        assert!(cat.is_system("Tables"));
        assert!(!cat.is_system("widgets"));
    }
}
