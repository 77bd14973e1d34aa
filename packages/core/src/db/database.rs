//! Database Connection Management
//!
//! Connection setup, schema migration and transaction helpers for the
//! embedded libsql database backing the contribution plan tables.
//!
//! # Database Connection Patterns
//!
//! **Use `connect_with_timeout()` in async functions.** It sets a 5-second
//! busy timeout so concurrent writers wait for the lock instead of failing
//! immediately with `SQLITE_BUSY`, and enables foreign keys (a per-connection
//! setting in SQLite).
//!
//! ```no_run
//! # use contribution_plan_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/contribution-plan.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Transactions
//!
//! Each mutation runs between [`DatabaseService::begin`] and
//! [`DatabaseService::finish_transaction`], so the row change and its
//! history snapshot commit together or not at all.

use crate::db::error::DatabaseError;
use crate::db::migrations::{self, Migration};
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Open (or create) the database at `db_path` and apply pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - A migration fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        tracing::info!(path = %service.db_path.display(), "Database ready");
        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Configure the database file and run every pending migration
    ///
    /// Safe to call repeatedly: applied migrations are recorded in
    /// `schema_migrations` and skipped.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create schema_migrations table: {}",
                e
            ))
        })?;

        let applied = self.applied_migration_versions(&conn).await?;
        for migration in migrations::all() {
            if applied.contains(&migration.version) {
                continue;
            }
            self.apply_migration(&conn, &migration).await?;
        }

        // Flush schema to the main file for freshly created databases so a
        // second handle opened right away sees every table.
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    async fn applied_migration_versions(&self, conn: &Connection) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = conn
            .query("SELECT version FROM schema_migrations ORDER BY version", ())
            .await
            .map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to read migrations: {}", e))
            })?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next().await? {
            versions.push(row.get::<i64>(0)?);
        }
        Ok(versions)
    }

    async fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying schema migration"
        );

        self.begin(conn).await?;

        let mut result = Ok(());
        for statement in &migration.statements {
            if let Err(e) = conn.execute(statement, ()).await {
                result = Err(DatabaseError::migration_failed(
                    migration.version,
                    migration.name,
                    e.to_string(),
                ));
                break;
            }
        }

        if result.is_ok() {
            result = conn
                .execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?, ?)",
                    (migration.version, migration.name),
                )
                .await
                .map(|_| ())
                .map_err(|e| {
                    DatabaseError::migration_failed(migration.version, migration.name, e.to_string())
                });
        }

        self.finish_transaction(conn, result).await
    }

    /// Get a synchronous connection without busy timeout
    ///
    /// Only for single-threaded contexts; prefer `connect_with_timeout()`.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Start a write transaction, taking the write lock up front
    pub async fn begin(&self, conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, passing the result through
    pub async fn finish_transaction<T, E>(
        &self,
        conn: &Connection,
        result: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        match result {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    let _rollback = conn.execute("ROLLBACK", ()).await;
                    return Err(E::from(DatabaseError::sql_execution(format!(
                        "Failed to commit transaction: {}",
                        e
                    ))));
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!("Rollback failed: {}", e);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(db_service: &DatabaseService) -> Vec<String> {
        let conn = db_service.connect().unwrap();
        let mut rows = conn
            .query("SELECT name FROM sqlite_master WHERE type='table'", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        names
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let names = table_names(&db_service).await;
        for table in [
            "tblProduct",
            "tblContributionPlan",
            "tblContributionPlan_history",
            "tblContributionPlanBundle",
            "tblContributionPlanBundle_history",
            "tblContributionPlanBundleDetails",
            "tblContributionPlanBundleDetails_history",
            "tblPaymentPlan",
            "tblPaymentPlan_history",
            "tblMutationLog",
            "contribution_plan_ContributionPlanMutation",
            "contribution_plan_bundle_ContributionPlanBundleMutation",
        ] {
            assert!(names.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect().unwrap();

        let mut stmt = conn.prepare("PRAGMA journal_mode").await.unwrap();
        let mut rows = stmt.query(()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let mode: String = row.get(0).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let mut stmt = conn.prepare("PRAGMA foreign_keys").await.unwrap();
        let mut rows = stmt.query(()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let enabled: i64 = row.get(0).unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_migrations_applied_once() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _first = DatabaseService::new(db_path.clone()).await.unwrap();
        let second = DatabaseService::new(db_path).await.unwrap();

        let conn = second.connect().unwrap();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM schema_migrations", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count as usize, migrations::all().len());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        db_service.begin(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO tblProduct (ProductCode, ProductName) VALUES ('P1', 'Product')",
            (),
        )
        .await
        .unwrap();
        let result: Result<(), DatabaseError> = Err(DatabaseError::sql_execution("forced"));
        assert!(db_service.finish_transaction(&conn, result).await.is_err());

        let mut rows = conn.query("SELECT COUNT(*) FROM tblProduct", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }
}
