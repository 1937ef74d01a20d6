//! Live table/column catalog used by the schema validator

use ahash::{HashMap, HashMapExt};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to load schema catalog: {0}")]
    LoadError(String),

    #[error("No catalog source configured")]
    NoSource,
}

/// Anything that can enumerate the live database schema
pub trait CatalogSource: Send + Sync {
    fn load_catalog(&self) -> Result<SchemaCatalog, CatalogError>;
}

/// Upper-cased table name to upper-cased column names
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaCatalog {
    tables: HashMap<String, BTreeSet<String>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Builder-style helper, mostly for tests and fixtures
    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert_table(table, columns);
        self
    }

    pub fn insert_table<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns
            .into_iter()
            .map(|c| c.as_ref().to_uppercase())
            .collect();
        self.tables.insert(table.to_uppercase(), columns);
    }

    /// Case-insensitive table lookup
    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_uppercase())
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.tables.get(&table.to_uppercase())
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let catalog = SchemaCatalog::new().with_table("tenants", ["id", "Name"]);

        assert!(catalog.contains_table("TENANTS"));
        assert!(catalog.contains_table("Tenants"));
        let columns = catalog.columns("tenants").unwrap();
        assert!(columns.contains("NAME"));
        assert!(columns.contains("ID"));
    }

    #[test]
    fn test_table_names_sorted() {
        let catalog = SchemaCatalog::new()
            .with_table("UNITS", ["ID"])
            .with_table("BUILDINGS", ["ID"])
            .with_table("TENANTS", ["ID"]);

        assert_eq!(catalog.table_names(), vec!["BUILDINGS", "TENANTS", "UNITS"]);
        assert_eq!(catalog.len(), 3);
    }
}
