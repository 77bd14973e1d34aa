//! Mutation log and mutation-link storage

use anyhow::Context;
use libsql::Connection;
use uuid::Uuid;

use crate::db::records::{format_timestamp, parse_timestamp};
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{EntityKind, MutationLogEntry, MutationStatus};

const TABLE: &str = "tblMutationLog";

impl DatabaseService {
    pub async fn db_insert_mutation_log(
        &self,
        entry: &MutationLogEntry,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let json_content = serde_json::to_string(&entry.json_content)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to serialize mutation: {}", e)))?;

        conn.execute(
            "INSERT INTO tblMutationLog (UUID, MutationName, JSON_Content, UserUUID, RequestDateTime, ClientMutationID, ClientMutationLabel, Status, Error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                entry.id.to_string(),
                entry.mutation_name.as_str(),
                json_content,
                entry.user_id.map(|u| u.to_string()),
                format_timestamp(&entry.request_date_time),
                entry.client_mutation_id.as_deref(),
                entry.client_mutation_label.as_deref(),
                entry.status.code(),
                entry.error.as_deref(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to log mutation: {}", e)))?;
        Ok(())
    }

    pub async fn db_set_mutation_status(
        &self,
        id: Uuid,
        status: MutationStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute(
            "UPDATE tblMutationLog SET Status = ?, Error = ? WHERE UUID = ?",
            (status.code(), error, id.to_string()),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to update mutation {}: {}", id, e))
        })?;
        Ok(())
    }

    pub async fn db_get_mutation_log(
        &self,
        id: Uuid,
    ) -> Result<Option<MutationLogEntry>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT UUID, MutationName, JSON_Content, UserUUID, RequestDateTime, ClientMutationID, ClientMutationLabel, Status, Error
                 FROM tblMutationLog WHERE UUID = ?",
                [id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query mutation log: {}", e)))?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let entry = (|| -> anyhow::Result<MutationLogEntry> {
            let id: String = row.get(0).context("Failed to get UUID")?;
            let json_content: String = row.get(2).context("Failed to get JSON_Content")?;
            let user: Option<String> = row.get(3).context("Failed to get UserUUID")?;
            let requested: String = row.get(4).context("Failed to get RequestDateTime")?;
            let status: i64 = row.get(7).context("Failed to get Status")?;
            Ok(MutationLogEntry {
                id: Uuid::parse_str(&id)?,
                mutation_name: row.get(1).context("Failed to get MutationName")?,
                json_content: serde_json::from_str(&json_content)?,
                user_id: user.as_deref().map(Uuid::parse_str).transpose()?,
                request_date_time: parse_timestamp(&requested)?,
                client_mutation_id: row.get(5).context("Failed to get ClientMutationID")?,
                client_mutation_label: row.get(6).context("Failed to get ClientMutationLabel")?,
                status: MutationStatus::from_code(status)
                    .ok_or_else(|| anyhow::anyhow!("Unknown mutation status {}", status))?,
                error: row.get(8).context("Failed to get Error")?,
            })
        })()
        .map_err(|e| DatabaseError::row_decode(TABLE, e))?;

        Ok(Some(entry))
    }

    /// Link a mutation log entry to an affected row
    ///
    /// Returns `false` for kinds without a mutation-link table.
    pub async fn db_link_mutation(
        &self,
        conn: &Connection,
        kind: EntityKind,
        entity_id: Uuid,
        mutation_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let Some((table, column)) = kind.mutation_link() else {
            return Ok(false);
        };

        conn.execute(
            &format!(
                "INSERT INTO {} (UUID, {}, mutation_id) VALUES (?, ?, ?)",
                table, column
            ),
            (
                Uuid::new_v4().to_string(),
                entity_id.to_string(),
                mutation_id.to_string(),
            ),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to link mutation {}: {}", mutation_id, e))
        })?;
        Ok(true)
    }

    /// Mutation ids linked to a row, oldest link first
    pub async fn db_get_mutation_links(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let Some((table, column)) = kind.mutation_link() else {
            return Ok(Vec::new());
        };

        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT l.mutation_id FROM {} l JOIN tblMutationLog m ON m.UUID = l.mutation_id
                     WHERE l.{} = ? ORDER BY m.RequestDateTime, l.rowid",
                    table, column
                ),
                [entity_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query {}: {}", table, e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            ids.push(
                Uuid::parse_str(&id)
                    .map_err(|e| DatabaseError::row_decode(table, anyhow::Error::new(e)))?,
            );
        }
        Ok(ids)
    }
}
