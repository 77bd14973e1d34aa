//! History Snapshots
//!
//! Every create, update and delete appends a copy of the row to the entity's
//! `_history` table inside the same transaction. History rows are never
//! updated or removed.

use anyhow::Context;
use chrono::{DateTime, Utc};
use libsql::Connection;
use uuid::Uuid;

use crate::db::records::{parse_timestamp, record_from_row, select_columns, format_timestamp, TableColumns};
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{EntityKind, HistoryEntry, HistoryType};

/// Audit details stored with each snapshot
#[derive(Debug, Clone)]
pub struct HistoryStamp<'a> {
    pub history_type: HistoryType,
    pub date: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub change_reason: Option<&'a str>,
}

impl DatabaseService {
    /// Copy the current state of row `id` into the history table
    pub async fn db_insert_history<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        id: Uuid,
        stamp: &HistoryStamp<'_>,
    ) -> Result<(), DatabaseError> {
        let columns = select_columns::<D>(None);
        let sql = format!(
            "INSERT INTO {history} ({columns}, history_date, history_change_reason, history_type, history_user_id)
             SELECT {columns}, ?, ?, ?, ? FROM {table} WHERE UUID = ?",
            history = kind.history_table(),
            table = kind.table(),
            columns = columns,
        );

        let inserted = conn
            .execute(
                &sql,
                (
                    format_timestamp(&stamp.date),
                    stamp.change_reason,
                    stamp.history_type.as_tag(),
                    stamp.user_id.map(|u| u.to_string()),
                    id.to_string(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to write history for {} {}: {}",
                    kind, id, e
                ))
            })?;

        if inserted != 1 {
            return Err(DatabaseError::sql_execution(format!(
                "No {} row {} to snapshot",
                kind, id
            )));
        }
        Ok(())
    }

    /// History of one row id, newest first
    pub async fn db_get_history<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        id: Uuid,
    ) -> Result<Vec<HistoryEntry<D>>, DatabaseError> {
        let sql = format!(
            "SELECT history_id, history_date, history_type, history_change_reason, history_user_id, {}
             FROM {} h WHERE h.UUID = ?
             ORDER BY h.history_date DESC, h.history_id DESC",
            select_columns::<D>(Some("h")),
            kind.history_table()
        );

        let mut rows = conn.query(&sql, [id.to_string()]).await.map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to query {}: {}",
                kind.history_table(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let entry = (|| -> anyhow::Result<HistoryEntry<D>> {
                let history_date: String = row.get(1).context("Failed to get history_date")?;
                let tag: String = row.get(2).context("Failed to get history_type")?;
                let user: Option<String> = row.get(4).context("Failed to get history_user_id")?;
                Ok(HistoryEntry {
                    history_id: row.get(0).context("Failed to get history_id")?,
                    history_date: parse_timestamp(&history_date)?,
                    history_type: HistoryType::from_tag(&tag)
                        .ok_or_else(|| anyhow::anyhow!("Unknown history_type '{}'", tag))?,
                    history_change_reason: row
                        .get(3)
                        .context("Failed to get history_change_reason")?,
                    history_user_id: user
                        .as_deref()
                        .map(Uuid::parse_str)
                        .transpose()
                        .context("Invalid history_user_id")?,
                    record: record_from_row::<D>(&row, 5)?,
                })
            })()
            .map_err(|e| DatabaseError::row_decode(kind.history_table(), e))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
