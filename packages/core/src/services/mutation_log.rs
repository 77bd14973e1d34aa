//! Mutation Log and Post-Commit Observers
//!
//! GraphQL mutations are recorded in `tblMutationLog` as `Received` before
//! they run and marked `Success` or `Error` afterwards. Services report each
//! committed row change to [`MutationObserver`]s; [`MutationLinker`] is the
//! observer that links the row to the mutation that changed it.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::DatabaseService;
use crate::models::{now_utc, EntityKind, MutationLogEntry, MutationStatus};
use crate::services::security::Caller;
use crate::services::PlanServiceError;

/// Notified once per affected row after a mutation's transaction commits
#[async_trait]
pub trait MutationObserver: Send + Sync {
    async fn on_committed(
        &self,
        kind: EntityKind,
        id: Uuid,
        mutation_id: Uuid,
    ) -> Result<(), PlanServiceError>;
}

/// Writes a mutation-link row for kinds that have a link table
pub struct MutationLinker {
    db: Arc<DatabaseService>,
}

impl MutationLinker {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MutationObserver for MutationLinker {
    async fn on_committed(
        &self,
        kind: EntityKind,
        id: Uuid,
        mutation_id: Uuid,
    ) -> Result<(), PlanServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        if self.db.db_link_mutation(&conn, kind, id, mutation_id).await? {
            tracing::debug!("Linked {} {} to mutation {}", kind, id, mutation_id);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MutationLogService {
    db: Arc<DatabaseService>,
}

impl MutationLogService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Record a mutation as received, before any of its writes
    pub async fn begin(
        &self,
        caller: &Caller,
        mutation_name: &str,
        payload: serde_json::Value,
        client_mutation_id: Option<String>,
        client_mutation_label: Option<String>,
    ) -> Result<MutationLogEntry, PlanServiceError> {
        let entry = MutationLogEntry {
            id: Uuid::new_v4(),
            mutation_name: mutation_name.to_string(),
            json_content: payload,
            user_id: caller.user_id,
            request_date_time: now_utc(),
            client_mutation_id,
            client_mutation_label,
            status: MutationStatus::Received,
            error: None,
        };
        self.db.db_insert_mutation_log(&entry).await?;
        Ok(entry)
    }

    /// Mark the logged mutation with the outcome of running it
    pub async fn complete<T>(
        &self,
        entry: &MutationLogEntry,
        outcome: &Result<T, PlanServiceError>,
    ) -> Result<(), PlanServiceError> {
        match outcome {
            Ok(_) => {
                self.db
                    .db_set_mutation_status(entry.id, MutationStatus::Success, None)
                    .await?
            }
            Err(e) => {
                tracing::info!("Mutation {} ({}) failed: {}", entry.mutation_name, entry.id, e);
                self.db
                    .db_set_mutation_status(entry.id, MutationStatus::Error, Some(&e.to_string()))
                    .await?
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MutationLogEntry>, PlanServiceError> {
        Ok(self.db.db_get_mutation_log(id).await?)
    }

    /// Mutations that touched a row, oldest first
    pub async fn mutations_for(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Uuid>, PlanServiceError> {
        Ok(self.db.db_get_mutation_links(kind, entity_id).await?)
    }
}
