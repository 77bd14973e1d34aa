//! Contribution Plan Core
//!
//! Versioned, soft-deletable contribution plans, payment plans, plan bundles
//! and bundle membership, with history tracking and a GraphQL surface.
//!
//! # Architecture
//!
//! - **Versioned rows**: every entity carries shared business columns
//!   (version, validity window, replacement link, audit fields)
//! - **History tables**: each create, update and delete appends an immutable
//!   snapshot tagged `+`, `~` or `-` in the same transaction
//! - **libsql**: embedded SQLite-compatible database with ordered migrations
//! - **Explicit dispatch**: committed mutations are reported to injected
//!   [`MutationObserver`](services::MutationObserver)s
//!
//! # Modules
//!
//! - [`models`] - Entity data, patches, filters and mutation log entries
//! - [`db`] - Database layer with libsql integration
//! - [`services`] - Permission checks, mutations and queries
//! - [`graphql`] - async-graphql schema over the services
//! - [`config`] - Environment-driven configuration

pub mod config;
pub mod db;
pub mod graphql;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::PlanConfig;
pub use db::{DatabaseError, DatabaseService};
pub use models::*;
pub use services::*;
