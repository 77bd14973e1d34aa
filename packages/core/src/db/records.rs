//! Versioned Record Storage
//!
//! Generic SQL for the four entity tables. Each data type describes its own
//! columns through [`TableColumns`]; the shared business columns are handled
//! here once.
//!
//! All write helpers take the caller's connection so they run inside the
//! mutation's transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Value};
use uuid::Uuid;

use crate::db::{DatabaseError, DatabaseService};
use crate::models::{
    BundleData, BundleDetailsData, BusinessMeta, EntityFilter, EntityKind, FilterOperator,
    PlanData, Predicate, Record, SortDirection,
};

/// Shared business columns, in storage order
pub(crate) const META_COLUMNS: [&str; 11] = [
    "UUID",
    "isDeleted",
    "Json_ext",
    "DateCreated",
    "DateUpdated",
    "version",
    "DateValidFrom",
    "DateValidTo",
    "ReplacementUUID",
    "UserCreatedUUID",
    "UserUpdatedUUID",
];

const META_LEN: i32 = META_COLUMNS.len() as i32;

const TIMESTAMP_COLUMNS: [&str; 4] = ["DateCreated", "DateUpdated", "DateValidFrom", "DateValidTo"];

/// Column mapping for entity-specific data
pub trait TableColumns: Sized {
    /// Entity columns, stored after the business columns
    const COLUMNS: &'static [&'static str];

    /// Values for [`Self::COLUMNS`], in the same order
    fn values(&self) -> Vec<Value>;

    /// Decode from `row`, starting at column index `offset`
    fn from_row(row: &Row, offset: i32) -> Result<Self>;

    /// Storage column for an entity-specific filter or order field
    fn column_for(field: &str) -> Option<&'static str>;
}

/// Storage column for any filterable field, shared or entity-specific
pub fn resolve_column<D: TableColumns>(field: &str) -> Option<&'static str> {
    let shared = match field {
        "id" | "uuid" => Some("UUID"),
        "is_deleted" => Some("isDeleted"),
        "version" => Some("version"),
        "date_created" => Some("DateCreated"),
        "date_updated" => Some("DateUpdated"),
        "date_valid_from" => Some("DateValidFrom"),
        "date_valid_to" => Some("DateValidTo"),
        "replacement_uuid" => Some("ReplacementUUID"),
        "user_created" => Some("UserCreatedUUID"),
        "user_updated" => Some("UserUpdatedUUID"),
        _ => None,
    };
    shared.or_else(|| D::column_for(field))
}

/// Fixed-width UTC text so lexical and chronological order agree
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Parse a stored timestamp; accepts RFC3339 and SQLite's `YYYY-MM-DD HH:MM:SS`
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(anyhow::anyhow!(
        "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
        s
    ))
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid UUID in {}: '{}'", column, s))
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

fn opt_integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn meta_values(meta: &BusinessMeta) -> Result<Vec<Value>> {
    let json_ext = match meta.json_ext {
        Some(ref ext) => Some(serde_json::to_string(ext).context("Failed to serialize json_ext")?),
        None => None,
    };

    Ok(vec![
        text(meta.id.to_string()),
        Value::Integer(i64::from(meta.is_deleted)),
        opt_text(json_ext),
        text(format_timestamp(&meta.date_created)),
        text(format_timestamp(&meta.date_updated)),
        Value::Integer(meta.version),
        text(format_timestamp(&meta.date_valid_from)),
        opt_text(meta.date_valid_to.as_ref().map(format_timestamp)),
        opt_text(meta.replacement_uuid.map(|id| id.to_string())),
        text(meta.user_created.to_string()),
        text(meta.user_updated.to_string()),
    ])
}

pub(crate) fn meta_from_row(row: &Row, offset: i32) -> Result<BusinessMeta> {
    let id: String = row.get(offset).context("Failed to get UUID")?;
    let is_deleted: i64 = row.get(offset + 1).context("Failed to get isDeleted")?;
    let json_ext: Option<String> = row.get(offset + 2).context("Failed to get Json_ext")?;
    let date_created: String = row.get(offset + 3).context("Failed to get DateCreated")?;
    let date_updated: String = row.get(offset + 4).context("Failed to get DateUpdated")?;
    let version: i64 = row.get(offset + 5).context("Failed to get version")?;
    let date_valid_from: String = row.get(offset + 6).context("Failed to get DateValidFrom")?;
    let date_valid_to: Option<String> = row.get(offset + 7).context("Failed to get DateValidTo")?;
    let replacement_uuid: Option<String> =
        row.get(offset + 8).context("Failed to get ReplacementUUID")?;
    let user_created: String = row.get(offset + 9).context("Failed to get UserCreatedUUID")?;
    let user_updated: String = row.get(offset + 10).context("Failed to get UserUpdatedUUID")?;

    Ok(BusinessMeta {
        id: parse_uuid(&id, "UUID")?,
        is_deleted: is_deleted != 0,
        version,
        date_valid_from: parse_timestamp(&date_valid_from).context("Failed to parse DateValidFrom")?,
        date_valid_to: date_valid_to
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse DateValidTo")?,
        replacement_uuid: replacement_uuid
            .as_deref()
            .map(|s| parse_uuid(s, "ReplacementUUID"))
            .transpose()?,
        json_ext: json_ext
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Failed to parse Json_ext")?,
        date_created: parse_timestamp(&date_created).context("Failed to parse DateCreated")?,
        date_updated: parse_timestamp(&date_updated).context("Failed to parse DateUpdated")?,
        user_created: parse_uuid(&user_created, "UserCreatedUUID")?,
        user_updated: parse_uuid(&user_updated, "UserUpdatedUUID")?,
    })
}

pub(crate) fn record_from_row<D: TableColumns>(row: &Row, offset: i32) -> Result<Record<D>> {
    Ok(Record {
        meta: meta_from_row(row, offset)?,
        data: D::from_row(row, offset + META_LEN)?,
    })
}

/// `UUID, isDeleted, ..., Code, Name, ...` with an optional table alias
pub(crate) fn select_columns<D: TableColumns>(alias: Option<&str>) -> String {
    META_COLUMNS
        .iter()
        .chain(D::COLUMNS.iter())
        .map(|c| match alias {
            Some(a) => format!("{}.{}", a, c),
            None => c.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl TableColumns for PlanData {
    const COLUMNS: &'static [&'static str] =
        &["Code", "Name", "calculationUUID", "BenefitPlanID", "Periodicity"];

    fn values(&self) -> Vec<Value> {
        vec![
            opt_text(self.code.clone()),
            opt_text(self.name.clone()),
            text(self.calculation.to_string()),
            Value::Integer(self.benefit_plan_id),
            Value::Integer(self.periodicity),
        ]
    }

    fn from_row(row: &Row, offset: i32) -> Result<Self> {
        let calculation: String = row.get(offset + 2).context("Failed to get calculationUUID")?;
        Ok(Self {
            code: row.get(offset).context("Failed to get Code")?,
            name: row.get(offset + 1).context("Failed to get Name")?,
            calculation: parse_uuid(&calculation, "calculationUUID")?,
            benefit_plan_id: row.get(offset + 3).context("Failed to get BenefitPlanID")?,
            periodicity: row.get(offset + 4).context("Failed to get Periodicity")?,
        })
    }

    fn column_for(field: &str) -> Option<&'static str> {
        match field {
            "code" => Some("Code"),
            "name" => Some("Name"),
            "calculation" => Some("calculationUUID"),
            "benefit_plan" | "benefit_plan_id" => Some("BenefitPlanID"),
            "periodicity" => Some("Periodicity"),
            _ => None,
        }
    }
}

impl TableColumns for BundleData {
    const COLUMNS: &'static [&'static str] = &["Code", "Name", "Periodicity"];

    fn values(&self) -> Vec<Value> {
        vec![
            text(self.code.clone()),
            opt_text(self.name.clone()),
            opt_integer(self.periodicity),
        ]
    }

    fn from_row(row: &Row, offset: i32) -> Result<Self> {
        Ok(Self {
            code: row.get(offset).context("Failed to get Code")?,
            name: row.get(offset + 1).context("Failed to get Name")?,
            periodicity: row.get(offset + 2).context("Failed to get Periodicity")?,
        })
    }

    fn column_for(field: &str) -> Option<&'static str> {
        match field {
            "code" => Some("Code"),
            "name" => Some("Name"),
            "periodicity" => Some("Periodicity"),
            _ => None,
        }
    }
}

impl TableColumns for BundleDetailsData {
    const COLUMNS: &'static [&'static str] =
        &["ContributionPlanBundleUUID", "ContributionPlanUUID"];

    fn values(&self) -> Vec<Value> {
        vec![
            text(self.contribution_plan_bundle_id.to_string()),
            text(self.contribution_plan_id.to_string()),
        ]
    }

    fn from_row(row: &Row, offset: i32) -> Result<Self> {
        let bundle_id: String = row
            .get(offset)
            .context("Failed to get ContributionPlanBundleUUID")?;
        let plan_id: String = row
            .get(offset + 1)
            .context("Failed to get ContributionPlanUUID")?;
        Ok(Self {
            contribution_plan_bundle_id: parse_uuid(&bundle_id, "ContributionPlanBundleUUID")?,
            contribution_plan_id: parse_uuid(&plan_id, "ContributionPlanUUID")?,
        })
    }

    fn column_for(field: &str) -> Option<&'static str> {
        match field {
            "contribution_plan_bundle" | "contribution_plan_bundle_id" => {
                Some("ContributionPlanBundleUUID")
            }
            "contribution_plan" | "contribution_plan_id" => Some("ContributionPlanUUID"),
            _ => None,
        }
    }
}

/// WHERE clause plus its positional parameters
#[derive(Debug, Default)]
pub(crate) struct WhereClause {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    fn push(&mut self, clause: impl Into<String>, params: Vec<Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn to_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn page_bound(name: &str, value: usize) -> std::result::Result<i64, DatabaseError> {
    i64::try_from(value)
        .map_err(|_| DatabaseError::sql_execution(format!("{} {} is out of range", name, value)))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Convert a JSON filter value into a bind value for `column`
fn filter_value(column: &str, value: &serde_json::Value) -> std::result::Result<Value, DatabaseError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Real))
            .ok_or_else(|| DatabaseError::sql_execution(format!("Unsupported number for {}", column))),
        serde_json::Value::String(s) if TIMESTAMP_COLUMNS.contains(&column) => {
            let dt = parse_timestamp(s)
                .map_err(|e| DatabaseError::sql_execution(format!("{}: {}", column, e)))?;
            Ok(text(format_timestamp(&dt)))
        }
        serde_json::Value::String(s) => Ok(text(s.clone())),
        other => Err(DatabaseError::sql_execution(format!(
            "Unsupported filter value for {}: {}",
            column, other
        ))),
    }
}

pub(crate) fn build_where<D: TableColumns>(
    kind: EntityKind,
    filter: &EntityFilter,
    predicates: &[Predicate],
) -> std::result::Result<WhereClause, DatabaseError> {
    let mut clause = WhereClause::default();

    clause.push(
        "isDeleted = ?",
        vec![Value::Integer(i64::from(filter.is_deleted.unwrap_or(false)))],
    );

    for predicate in predicates {
        match predicate {
            Predicate::MatchNone => clause.push("1 = 0", vec![]),
            Predicate::ValidAt(at) => clause.push(
                "(DateValidTo IS NULL OR DateValidTo > ?)",
                vec![text(format_timestamp(at))],
            ),
            Predicate::ValidFromAtLeast(from) => {
                clause.push("DateValidFrom >= ?", vec![text(format_timestamp(from))])
            }
            Predicate::ValidToAtMost(to) => clause.push(
                "(DateValidTo IS NULL OR DateValidTo <= ?)",
                vec![text(format_timestamp(to))],
            ),
        }
    }

    for field_filter in &filter.field_filters {
        let column = resolve_column::<D>(&field_filter.field).ok_or_else(|| {
            DatabaseError::sql_execution(format!("Unknown filter field: {}", field_filter.field))
        })?;
        let value = filter_value(column, &field_filter.value)?;

        match field_filter.operator {
            FilterOperator::Equals if matches!(value, Value::Null) => {
                clause.push(format!("{} IS NULL", column), vec![])
            }
            FilterOperator::Equals => clause.push(format!("{} = ?", column), vec![value]),
            FilterOperator::GreaterThanOrEqual => clause.push(format!("{} >= ?", column), vec![value]),
            FilterOperator::LessThanOrEqual => clause.push(format!("{} <= ?", column), vec![value]),
            FilterOperator::IContains | FilterOperator::IStartsWith => {
                let Value::Text(s) = value else {
                    return Err(DatabaseError::sql_execution(format!(
                        "Operator {:?} requires a text value for {}",
                        field_filter.operator, column
                    )));
                };
                let pattern = if field_filter.operator == FilterOperator::IContains {
                    format!("%{}%", escape_like(&s))
                } else {
                    format!("{}%", escape_like(&s))
                };
                clause.push(
                    format!("LOWER({}) LIKE LOWER(?) ESCAPE '\\'", column),
                    vec![text(pattern)],
                );
            }
        }
    }

    // Bundle filters reach through membership rows to the contribution plan.
    // EXISTS keeps each bundle at most once however many memberships match.
    if kind == EntityKind::ContributionPlanBundle {
        let membership = |condition: &str| {
            format!(
                "EXISTS (SELECT 1 FROM tblContributionPlanBundleDetails d \
                 JOIN tblContributionPlan p ON p.UUID = d.ContributionPlanUUID \
                 WHERE d.ContributionPlanBundleUUID = t.UUID AND d.isDeleted = 0 AND {})",
                condition
            )
        };
        if let Some(calculation) = filter.calculation {
            clause.push(
                membership("p.calculationUUID = ?"),
                vec![text(calculation.to_string())],
            );
        }
        if let Some(product_id) = filter.insurance_product {
            clause.push(membership("p.BenefitPlanID = ?"), vec![Value::Integer(product_id)]);
        }
    }

    Ok(clause)
}

pub(crate) fn build_order<D: TableColumns>(filter: &EntityFilter) -> std::result::Result<String, DatabaseError> {
    let mut keys = Vec::with_capacity(filter.order_by.len() + 1);
    for order in &filter.order_by {
        let column = resolve_column::<D>(&order.field).ok_or_else(|| {
            DatabaseError::sql_execution(format!("Unknown order field: {}", order.field))
        })?;
        let direction = match order.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        keys.push(format!("{} {}", column, direction));
    }
    if keys.is_empty() {
        keys.push("DateCreated DESC".to_string());
    }
    keys.push("UUID ASC".to_string());
    Ok(format!(" ORDER BY {}", keys.join(", ")))
}

impl DatabaseService {
    /// Insert a new record
    pub async fn db_insert_record<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        record: &Record<D>,
    ) -> std::result::Result<(), DatabaseError> {
        let columns = select_columns::<D>(None);
        let placeholders = vec!["?"; META_COLUMNS.len() + D::COLUMNS.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            kind.table(),
            columns,
            placeholders
        );

        let mut values =
            meta_values(&record.meta).map_err(|e| DatabaseError::row_decode(kind.table(), e))?;
        values.extend(record.data.values());

        conn.execute(&sql, Params::Positional(values))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to insert into {}: {}",
                    kind.table(),
                    e
                ))
            })?;
        Ok(())
    }

    /// Overwrite every column of an existing record except its identity
    pub async fn db_update_record<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        record: &Record<D>,
    ) -> std::result::Result<(), DatabaseError> {
        let assignments = META_COLUMNS[1..]
            .iter()
            .chain(D::COLUMNS.iter())
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {} WHERE UUID = ?", kind.table(), assignments);

        let mut values =
            meta_values(&record.meta).map_err(|e| DatabaseError::row_decode(kind.table(), e))?;
        let id = values.remove(0);
        values.extend(record.data.values());
        values.push(id);

        let affected = conn
            .execute(&sql, Params::Positional(values))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update {}: {}", kind.table(), e))
            })?;

        if affected != 1 {
            return Err(DatabaseError::sql_execution(format!(
                "Expected to update one row in {} for {}, updated {}",
                kind.table(),
                record.meta.id,
                affected
            )));
        }
        Ok(())
    }

    /// Fetch one record by id, deleted or not
    pub async fn db_get_record<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        id: Uuid,
    ) -> std::result::Result<Option<Record<D>>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE UUID = ?",
            select_columns::<D>(None),
            kind.table()
        );

        let mut rows = conn.query(&sql, [id.to_string()]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query {}: {}", kind.table(), e))
        })?;

        match rows.next().await? {
            Some(row) => record_from_row::<D>(&row, 0)
                .map(Some)
                .map_err(|e| DatabaseError::row_decode(kind.table(), e)),
            None => Ok(None),
        }
    }

    /// Run a filtered, ordered, paginated query
    ///
    /// Returns the requested page and the total number of matching rows.
    pub async fn db_query_records<D: TableColumns>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        filter: &EntityFilter,
        predicates: &[Predicate],
    ) -> std::result::Result<(Vec<Record<D>>, i64), DatabaseError> {
        let where_clause = build_where::<D>(kind, filter, predicates)?;
        let where_sql = where_clause.to_sql();

        let count_sql = format!("SELECT COUNT(*) FROM {} AS t{}", kind.table(), where_sql);
        let mut count_rows = conn
            .query(&count_sql, Params::Positional(where_clause.params.clone()))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to count {}: {}", kind.table(), e))
            })?;
        let total: i64 = match count_rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let mut params = where_clause.params;
        let mut page_sql = String::new();
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                page_sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::Integer(page_bound("limit", limit)?));
                params.push(Value::Integer(page_bound("offset", offset.unwrap_or(0))?));
            }
            (None, Some(offset)) => {
                page_sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(page_bound("offset", offset)?));
            }
            (None, None) => {}
        }

        let sql = format!(
            "SELECT {} FROM {} AS t{}{}{}",
            select_columns::<D>(None),
            kind.table(),
            where_sql,
            build_order::<D>(filter)?,
            page_sql
        );

        tracing::debug!(table = kind.table(), %sql, "Querying records");

        let mut rows = conn
            .query(&sql, Params::Positional(params))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query {}: {}", kind.table(), e))
            })?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(
                record_from_row::<D>(&row, 0)
                    .map_err(|e| DatabaseError::row_decode(kind.table(), e))?,
            );
        }

        Ok((records, total))
    }
}
