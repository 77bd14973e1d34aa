//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Connection management, pragmas and transactions ([`DatabaseService`])
//! - Ordered schema migrations recorded in `schema_migrations`
//! - Generic storage of versioned records and their history snapshots
//! - Mutation log and mutation-link tables
//! - Product lookups for the benefit plan reference
//!
//! Storage methods are `db_*` methods on [`DatabaseService`], split across
//! the submodules by table family.

mod database;
mod error;
mod history;
pub mod migrations;
mod mutation_log;
mod products;
mod records;

pub use database::DatabaseService;
pub use error::DatabaseError;
pub use history::HistoryStamp;
pub use records::{format_timestamp, parse_timestamp, resolve_column, TableColumns};
