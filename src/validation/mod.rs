//! Static schema validation of generated SQL
//!
//! Checks referenced tables and columns against a catalog loaded once from
//! the live database. The catalog is only reloaded by an explicit
//! [`SchemaValidator::refresh`].

mod catalog;
mod extract;

pub use catalog::{CatalogError, CatalogSource, SchemaCatalog};

use extract::{ColumnRef, SqlPatterns};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Invalid validator pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Outcome of one validation. `feedback` is empty iff `valid`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
    pub feedback: String,
}

impl ValidationResult {
    fn from_findings(errors: Vec<String>, suggestions: Vec<String>) -> Self {
        let feedback = compose_feedback(&errors, &suggestions);
        Self {
            valid: errors.is_empty(),
            errors,
            suggestions,
            feedback,
        }
    }
}

/// Text appended to the next generation prompt
fn compose_feedback(errors: &[String], suggestions: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut parts = vec!["The previous SQL attempt failed schema validation:".to_string()];
    parts.extend(errors.iter().map(|e| format!("- {}", e)));

    if !suggestions.is_empty() {
        parts.push("\nSuggestions:".to_string());
        parts.extend(suggestions.iter().map(|s| format!("- {}", s)));
    }

    parts.push("\nFix these errors and generate the SQL again.".to_string());
    parts.join("\n")
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Schema validator over a shared, manually refreshed catalog
pub struct SchemaValidator {
    source: Option<Arc<dyn CatalogSource>>,
    catalog: RwLock<Arc<SchemaCatalog>>,
    patterns: SqlPatterns,
    /// (qualifier, replacement) pairs for column suggestions
    column_aliases: Vec<(String, String)>,
}

impl SchemaValidator {
    /// Load the catalog from `source`
    pub fn load(
        source: Arc<dyn CatalogSource>,
        column_aliases: Vec<(String, String)>,
    ) -> Result<Self, ValidatorError> {
        let catalog = source.load_catalog()?;
        tracing::info!("Schema validator loaded {} tables", catalog.len());

        Ok(Self {
            source: Some(source),
            catalog: RwLock::new(Arc::new(catalog)),
            patterns: SqlPatterns::compile()?,
            column_aliases,
        })
    }

    /// Validator over a fixed catalog; `refresh` is unavailable
    pub fn with_catalog(
        catalog: SchemaCatalog,
        column_aliases: Vec<(String, String)>,
    ) -> Result<Self, ValidatorError> {
        Ok(Self {
            source: None,
            catalog: RwLock::new(Arc::new(catalog)),
            patterns: SqlPatterns::compile()?,
            column_aliases,
        })
    }

    /// Reload the catalog from the live database. In-flight validations keep
    /// the snapshot they started with.
    pub fn refresh(&self) -> Result<usize, ValidatorError> {
        let source = self.source.as_ref().ok_or(CatalogError::NoSource)?;
        let catalog = source.load_catalog()?;
        let tables = catalog.len();

        let mut guard = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(catalog);

        tracing::info!("Schema catalog refreshed: {} tables", tables);
        Ok(tables)
    }

    /// Current catalog snapshot
    pub fn catalog(&self) -> Arc<SchemaCatalog> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn validate(&self, sql: &str) -> ValidationResult {
        let catalog = self.catalog();
        let refs = self.patterns.extract(sql);

        let mut errors = Vec::new();
        let mut suggestions = Vec::new();

        if refs.is_empty {
            errors.push("empty-statement: no SQL to validate".to_string());
            return ValidationResult::from_findings(errors, suggestions);
        }

        // Referenced tables that are real catalog tables, in order
        let mut known: Vec<&str> = Vec::new();
        let mut unknown_tables = false;

        for table in &refs.tables {
            if refs.ctes.contains(&table.name) || table.name == "DUAL" {
                continue;
            }

            if catalog.contains_table(&table.name) {
                if !known.contains(&table.name.as_str()) {
                    known.push(&table.name);
                }
                continue;
            }

            unknown_tables = true;
            push_unique(&mut errors, format!("table-not-found: {}", table.name));
            let names = catalog.table_names();
            if let Some(similar) = find_similar(&table.name, names.iter().copied()) {
                push_unique(
                    &mut suggestions,
                    format!("replace table {} with {}", table.name, similar),
                );
            }
        }

        let columns = refs.select_columns.iter().chain(refs.where_columns.iter());
        for column in columns {
            if column.column == "*" {
                continue;
            }

            match &column.qualifier {
                Some(qualifier) => {
                    if let Some(table) = refs.resolve(qualifier).filter(|t| known.contains(t)) {
                        self.check_column(&catalog, column, &[table], &mut errors, &mut suggestions);
                    }
                }
                None if !refs.has_subquery && !unknown_tables && !known.is_empty() => {
                    self.check_column(&catalog, column, &known, &mut errors, &mut suggestions);
                }
                None => {}
            }
        }

        if !errors.is_empty() {
            tracing::debug!("Validation failed: {}", errors.join(", "));
        }

        ValidationResult::from_findings(errors, suggestions)
    }

    /// Error if none of `tables` has the column
    fn check_column(
        &self,
        catalog: &SchemaCatalog,
        column: &ColumnRef,
        tables: &[&str],
        errors: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) {
        let candidates: BTreeSet<&str> = tables
            .iter()
            .filter_map(|t| catalog.columns(t))
            .flat_map(|cols| cols.iter().map(|c| c.as_str()))
            .collect();

        if candidates.contains(column.column.as_str()) {
            return;
        }

        let scope = if tables.len() == 1 {
            format!("table {}", tables[0])
        } else {
            format!("tables {}", tables.join(", "))
        };
        push_unique(
            errors,
            format!("column-not-found: {} ({})", column.column, scope),
        );

        let similar = find_similar(&column.column, candidates.iter().copied())
            .or_else(|| self.alias_suggestion(&column.column, &candidates));
        if let Some(similar) = similar {
            push_unique(
                suggestions,
                format!("replace column {} with {}", column.column, similar),
            );
        }
    }

    /// Qualifier heuristic, e.g. `BUILDING_ID` -> a column containing `UNIT`
    fn alias_suggestion<'a>(&self, column: &str, candidates: &BTreeSet<&'a str>) -> Option<&'a str> {
        let lower = column.to_lowercase();
        self.column_aliases
            .iter()
            .filter(|(qualifier, _)| lower.contains(&qualifier.to_lowercase()))
            .find_map(|(_, replacement)| {
                let replacement = replacement.to_lowercase();
                candidates
                    .iter()
                    .copied()
                    .find(|c| c.to_lowercase().contains(&replacement))
            })
    }
}

/// First name that contains, or is contained in, `wanted`
fn find_similar<'a>(wanted: &str, names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let wanted = wanted.to_lowercase();
    names.into_iter().find(|name| {
        let name = name.to_lowercase();
        name.contains(&wanted) || wanted.contains(&name)
    })
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("tables", &self.catalog().len())
            .field("refreshable", &self.source.is_some())
            .finish()
    }
}
