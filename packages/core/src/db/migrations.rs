//! Schema Migrations
//!
//! Ordered DDL steps applied once per database and recorded in
//! `schema_migrations`. Every versioned entity table gets a `_history`
//! shadow table with the same business columns plus the history fields.
//!
//! Shared column order (relied on by row decoding in `records`):
//! `UUID, isDeleted, Json_ext, DateCreated, DateUpdated, version,
//! DateValidFrom, DateValidTo, ReplacementUUID, UserCreatedUUID,
//! UserUpdatedUUID`, then the entity columns.

use crate::models::EntityKind;

/// One ordered schema step
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: Vec<String>,
}

const BUSINESS_COLUMNS: &str = "
    UUID TEXT PRIMARY KEY NOT NULL,
    isDeleted INTEGER NOT NULL DEFAULT 0,
    Json_ext TEXT,
    DateCreated TEXT NOT NULL,
    DateUpdated TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
    DateValidFrom TEXT NOT NULL,
    DateValidTo TEXT,
    ReplacementUUID TEXT,
    UserCreatedUUID TEXT NOT NULL,
    UserUpdatedUUID TEXT NOT NULL";

const HISTORY_BUSINESS_COLUMNS: &str = "
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    UUID TEXT NOT NULL,
    isDeleted INTEGER NOT NULL,
    Json_ext TEXT,
    DateCreated TEXT NOT NULL,
    DateUpdated TEXT NOT NULL,
    version INTEGER NOT NULL,
    DateValidFrom TEXT NOT NULL,
    DateValidTo TEXT,
    ReplacementUUID TEXT,
    UserCreatedUUID TEXT NOT NULL,
    UserUpdatedUUID TEXT NOT NULL";

const HISTORY_FIELDS: &str = "
    history_date TEXT NOT NULL,
    history_change_reason TEXT,
    history_type TEXT NOT NULL CHECK (history_type IN ('+', '~', '-')),
    history_user_id TEXT";

const PLAN_COLUMNS: &str = "
    Code TEXT,
    Name TEXT,
    calculationUUID TEXT NOT NULL,
    BenefitPlanID INTEGER NOT NULL REFERENCES tblProduct(ProdID),
    Periodicity INTEGER NOT NULL";

const PLAN_HISTORY_COLUMNS: &str = "
    Code TEXT,
    Name TEXT,
    calculationUUID TEXT NOT NULL,
    BenefitPlanID INTEGER NOT NULL,
    Periodicity INTEGER NOT NULL";

const BUNDLE_COLUMNS: &str = "
    Code TEXT NOT NULL,
    Name TEXT,
    Periodicity INTEGER";

const DETAILS_COLUMNS: &str = "
    ContributionPlanBundleUUID TEXT NOT NULL REFERENCES tblContributionPlanBundle(UUID),
    ContributionPlanUUID TEXT NOT NULL REFERENCES tblContributionPlan(UUID)";

const DETAILS_HISTORY_COLUMNS: &str = "
    ContributionPlanBundleUUID TEXT NOT NULL,
    ContributionPlanUUID TEXT NOT NULL";

fn entity_table(kind: EntityKind, columns: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({},{})",
        kind.table(),
        BUSINESS_COLUMNS,
        columns
    )
}

fn history_table(kind: EntityKind, columns: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({},{},{})",
        kind.history_table(),
        HISTORY_BUSINESS_COLUMNS,
        columns,
        HISTORY_FIELDS
    )
}

fn entity_indexes(kind: EntityKind) -> Vec<String> {
    let table = kind.table();
    let history = kind.history_table();
    vec![
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_validity ON {}(isDeleted, DateValidTo)",
            table, table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_created ON {}(DateCreated)",
            table, table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_uuid ON {}(UUID, history_date)",
            history, history
        ),
    ]
}

fn mutation_link_table(kind: EntityKind) -> Option<String> {
    kind.mutation_link().map(|(table, column)| {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                UUID TEXT PRIMARY KEY NOT NULL,
                {} TEXT NOT NULL REFERENCES {}(UUID),
                mutation_id TEXT NOT NULL REFERENCES tblMutationLog(UUID)
            )",
            table,
            column,
            kind.table()
        )
    })
}

/// All migrations in application order
pub fn all() -> Vec<Migration> {
    let mut plan_tables = vec![
        entity_table(EntityKind::ContributionPlanBundle, BUNDLE_COLUMNS),
        history_table(EntityKind::ContributionPlanBundle, BUNDLE_COLUMNS),
        entity_table(EntityKind::ContributionPlan, PLAN_COLUMNS),
        history_table(EntityKind::ContributionPlan, PLAN_HISTORY_COLUMNS),
        entity_table(EntityKind::ContributionPlanBundleDetails, DETAILS_COLUMNS),
        history_table(
            EntityKind::ContributionPlanBundleDetails,
            DETAILS_HISTORY_COLUMNS,
        ),
    ];
    for kind in [
        EntityKind::ContributionPlanBundle,
        EntityKind::ContributionPlan,
        EntityKind::ContributionPlanBundleDetails,
    ] {
        plan_tables.extend(entity_indexes(kind));
    }

    let mut payment_tables = vec![
        entity_table(EntityKind::PaymentPlan, PLAN_COLUMNS),
        history_table(EntityKind::PaymentPlan, PLAN_HISTORY_COLUMNS),
    ];
    payment_tables.extend(entity_indexes(EntityKind::PaymentPlan));

    let mut mutation_tables = vec!["CREATE TABLE IF NOT EXISTS tblMutationLog (
            UUID TEXT PRIMARY KEY NOT NULL,
            MutationName TEXT NOT NULL,
            JSON_Content TEXT NOT NULL,
            UserUUID TEXT,
            RequestDateTime TEXT NOT NULL,
            ClientMutationID TEXT,
            ClientMutationLabel TEXT,
            Status INTEGER NOT NULL DEFAULT 0,
            Error TEXT
        )"
    .to_string()];
    mutation_tables.extend(EntityKind::ALL.into_iter().filter_map(mutation_link_table));

    vec![
        Migration {
            version: 1,
            name: "create_product",
            statements: vec!["CREATE TABLE IF NOT EXISTS tblProduct (
                    ProdID INTEGER PRIMARY KEY AUTOINCREMENT,
                    ProductCode TEXT NOT NULL,
                    ProductName TEXT NOT NULL,
                    InsurancePeriod INTEGER
                )"
            .to_string()],
        },
        Migration {
            version: 2,
            name: "create_contribution_plan_tables",
            statements: plan_tables,
        },
        Migration {
            version: 3,
            name: "create_payment_plan_tables",
            statements: payment_tables,
        },
        Migration {
            version: 4,
            name: "create_mutation_log_tables",
            statements: mutation_tables,
        },
    ]
}
