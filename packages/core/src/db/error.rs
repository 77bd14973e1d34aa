//! Database Error Types
//!
//! Error types for connection, migration, query and row-decoding failures.
//! Service-level failures (not found, permission) live in the service layer.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// A schema migration step failed
    #[error("Migration {version} ({name}) failed: {context}")]
    MigrationFailed {
        version: i64,
        name: String,
        context: String,
    },

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A stored row could not be converted into its model
    #[error("Failed to decode row from {table}: {context}")]
    RowDecodeFailed { table: String, context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a migration failed error
    pub fn migration_failed(version: i64, name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MigrationFailed {
            version,
            name: name.into(),
            context: context.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row decode error, keeping the full `anyhow` context chain
    pub fn row_decode(table: impl Into<String>, err: anyhow::Error) -> Self {
        Self::RowDecodeFailed {
            table: table.into(),
            context: format!("{:#}", err),
        }
    }
}
