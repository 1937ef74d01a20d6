//! sqlrag - natural-language questions answered over a SQLite database
//!
//! Schema documents are retrieved with a hybrid semantic and BM25 search,
//! reranked, and handed to an LLM that writes SQL. Generated SQL is checked
//! against the live catalog and a read-only safety gate before it runs, and
//! failures are fed back to the generator for a bounded number of retries.

pub mod cli;
pub mod config;
pub mod database;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index_store;
pub mod indexing;
pub mod orchestrator;
pub mod retrieval;
pub mod safety;
pub mod services;
pub mod validation;

pub use error::{Result, SqlRagError};
