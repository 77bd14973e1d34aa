//! Contribution Plan Service
//!
//! Create, update, delete, replace and query operations shared by the four
//! versioned entity kinds. Each mutation:
//!
//! 1. checks the caller's permissions before touching the database
//! 2. validates input and references
//! 3. writes the row and its history snapshot in one transaction
//! 4. after commit, notifies every registered [`MutationObserver`]
//!
//! # Version rules
//!
//! - create: version 1
//! - update: version + 1 only when some field actually changed
//! - delete: version unchanged, `is_deleted` set
//! - replace: new row at version 1; predecessor closed, linked and bumped

use async_trait::async_trait;
use libsql::Connection;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::PlanConfig;
use crate::db::{resolve_column, DatabaseService, HistoryStamp, TableColumns};
use crate::models::{
    now_utc, BundleData, BundleDetailsData, BusinessMeta, ContributionPlanRecord, Entity,
    EntityData, EntityFilter, EntityInput, EntityKind, HistoryEntry, HistoryType, PlanData,
    Record, ValidationError,
};
use crate::services::mutation_log::MutationObserver;
use crate::services::security::{authorize, row_security_predicates, Caller, Operation};
use crate::services::PlanServiceError;

/// Adjusts a contribution plan's contribution length (starts at its periodicity)
pub type ContributionLengthHook = Arc<dyn Fn(&ContributionPlanRecord, i64) -> i64 + Send + Sync>;

/// Partial field set accepted by mutations on `E`
pub type PatchOf<E> = <<E as Entity>::Data as EntityData>::Patch;

/// Checks that the rows and products an entity points at exist
#[async_trait]
pub trait ValidateReferences {
    async fn validate_references(
        &self,
        db: &DatabaseService,
        conn: &Connection,
    ) -> Result<(), PlanServiceError>;
}

#[async_trait]
impl ValidateReferences for PlanData {
    async fn validate_references(
        &self,
        db: &DatabaseService,
        conn: &Connection,
    ) -> Result<(), PlanServiceError> {
        match db.db_get_product(conn, self.benefit_plan_id).await? {
            Some(_) => Ok(()),
            None => Err(PlanServiceError::invalid_reference(
                "benefitPlanId",
                self.benefit_plan_id,
            )),
        }
    }
}

#[async_trait]
impl ValidateReferences for BundleData {
    async fn validate_references(
        &self,
        _db: &DatabaseService,
        _conn: &Connection,
    ) -> Result<(), PlanServiceError> {
        Ok(())
    }
}

#[async_trait]
impl ValidateReferences for BundleDetailsData {
    async fn validate_references(
        &self,
        db: &DatabaseService,
        conn: &Connection,
    ) -> Result<(), PlanServiceError> {
        let bundle = db
            .db_get_record::<BundleData>(
                conn,
                EntityKind::ContributionPlanBundle,
                self.contribution_plan_bundle_id,
            )
            .await?;
        if !bundle.is_some_and(|b| !b.meta.is_deleted) {
            return Err(PlanServiceError::invalid_reference(
                "contributionPlanBundleId",
                self.contribution_plan_bundle_id,
            ));
        }

        let plan = db
            .db_get_record::<PlanData>(
                conn,
                EntityKind::ContributionPlan,
                self.contribution_plan_id,
            )
            .await?;
        if !plan.is_some_and(|p| !p.meta.is_deleted) {
            return Err(PlanServiceError::invalid_reference(
                "contributionPlanId",
                self.contribution_plan_id,
            ));
        }
        Ok(())
    }
}

/// Everything the service needs from an entity's data type
pub trait StoredData: EntityData + TableColumns + ValidateReferences {}

impl<T> StoredData for T where T: EntityData + TableColumns + ValidateReferences {}

/// One page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching rows across all pages
    pub total_count: i64,
    /// Position of the first item within the full result
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn has_next_page(&self) -> bool {
        i64::try_from(self.offset.saturating_add(self.items.len()))
            .map_or(false, |end| end < self.total_count)
    }
}

/// Outcome of a replace: the closed predecessor and its new successor
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement<D> {
    pub predecessor: Record<D>,
    pub successor: Record<D>,
}

fn validate_window(meta: &BusinessMeta) -> Result<(), ValidationError> {
    match meta.date_valid_to {
        Some(to) if to < meta.date_valid_from => Err(ValidationError::InvalidValue {
            field: "dateValidTo".to_string(),
            reason: "must not be earlier than dateValidFrom".to_string(),
        }),
        _ => Ok(()),
    }
}

fn validate_filter<D: TableColumns>(kind: EntityKind, filter: &EntityFilter) -> Result<(), PlanServiceError> {
    for field in filter
        .field_filters
        .iter()
        .map(|f| &f.field)
        .chain(filter.order_by.iter().map(|o| &o.field))
    {
        if resolve_column::<D>(field).is_none() {
            return Err(ValidationError::UnknownField(field.clone()).into());
        }
    }

    if kind != EntityKind::ContributionPlanBundle
        && (filter.calculation.is_some() || filter.insurance_product.is_some())
    {
        return Err(PlanServiceError::query_failed(format!(
            "calculation and insuranceProduct filters only apply to bundles, not {}",
            kind
        )));
    }
    if let Some(offset) = filter.offset {
        if i64::try_from(offset).is_err() {
            return Err(PlanServiceError::query_failed(format!(
                "offset {} is out of range",
                offset
            )));
        }
    }
    Ok(())
}

/// Versioned entity lifecycle and queries
#[derive(Clone)]
pub struct PlanService {
    db: Arc<DatabaseService>,
    config: PlanConfig,
    observers: Vec<Arc<dyn MutationObserver>>,
    contribution_length_hook: Option<ContributionLengthHook>,
}

impl PlanService {
    pub fn new(db: Arc<DatabaseService>, config: PlanConfig) -> Self {
        Self {
            db,
            config,
            observers: Vec::new(),
            contribution_length_hook: None,
        }
    }

    /// Register an observer notified after each committed mutation
    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_contribution_length_hook(mut self, hook: ContributionLengthHook) -> Self {
        self.contribution_length_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    fn require_user(caller: &Caller) -> Result<Uuid, PlanServiceError> {
        caller
            .user_id
            .ok_or(PlanServiceError::AuthenticationRequired)
    }

    fn hides_rows_from(&self, caller: &Caller) -> bool {
        self.config.row_security && caller.is_anonymous()
    }

    async fn notify(&self, kind: EntityKind, ids: &[Uuid], mutation_id: Option<Uuid>) {
        let Some(mutation_id) = mutation_id else {
            return;
        };
        for observer in &self.observers {
            for id in ids {
                if let Err(e) = observer.on_committed(kind, *id, mutation_id).await {
                    tracing::warn!(
                        "Observer failed for {} {} (mutation {}): {}",
                        kind,
                        id,
                        mutation_id,
                        e
                    );
                }
            }
        }
    }

    /// Create a new entity at version 1
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` / `AuthenticationRequired` before any write
    /// - `ValidationFailed` when a required field is missing (nothing is inserted)
    /// - `InvalidReference` when the product or referenced rows do not exist
    #[instrument(skip(self, caller, input), fields(kind = %E::KIND))]
    pub async fn create<E>(
        &self,
        caller: &Caller,
        input: EntityInput<PatchOf<E>>,
        mutation_id: Option<Uuid>,
    ) -> Result<Record<E::Data>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Create)?;
        let user = Self::require_user(caller)?;

        let data = E::Data::from_patch(&input.fields)?;
        let now = now_utc();
        let mut meta = BusinessMeta::new(user, now);
        meta.apply_input(&input.business);
        validate_window(&meta)?;
        let record = Record { meta, data };

        let conn = self.db.connect_with_timeout().await?;
        self.db.begin(&conn).await?;
        let result: Result<(), PlanServiceError> = async {
            record.data.validate_references(&self.db, &conn).await?;
            self.db.db_insert_record(&conn, kind, &record).await?;
            self.db
                .db_insert_history::<E::Data>(
                    &conn,
                    kind,
                    record.meta.id,
                    &HistoryStamp {
                        history_type: HistoryType::Created,
                        date: now,
                        user_id: Some(user),
                        change_reason: None,
                    },
                )
                .await?;
            Ok(())
        }
        .await;
        self.db.finish_transaction(&conn, result).await?;

        tracing::info!("Created {} {}", kind, record.meta.id);
        self.notify(kind, &[record.meta.id], mutation_id).await;
        Ok(record)
    }

    /// Apply a partial update to an existing, non-deleted entity
    ///
    /// Replaced rows are closed and fail with `NotActive`. Identical values
    /// leave the row, its version and its history untouched.
    #[instrument(skip(self, caller, input), fields(kind = %E::KIND, id = ?input.id))]
    pub async fn update<E>(
        &self,
        caller: &Caller,
        input: EntityInput<PatchOf<E>>,
        mutation_id: Option<Uuid>,
    ) -> Result<Record<E::Data>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Update)?;
        let user = Self::require_user(caller)?;
        let id = input
            .id
            .ok_or_else(|| ValidationError::MissingField("id".to_string()))?;
        let now = now_utc();

        let conn = self.db.connect_with_timeout().await?;
        self.db.begin(&conn).await?;
        let result: Result<(Record<E::Data>, bool), PlanServiceError> = async {
            let mut record = self
                .db
                .db_get_record::<E::Data>(&conn, kind, id)
                .await?
                .filter(|r| !r.meta.is_deleted)
                .ok_or_else(|| PlanServiceError::not_found(kind, id))?;
            if record.meta.replacement_uuid.is_some() {
                return Err(PlanServiceError::not_active(kind, id));
            }

            let data_changed = record.data.apply_patch(&input.fields);
            let meta_changed = record.meta.apply_input(&input.business);
            if !data_changed && !meta_changed {
                return Ok((record, false));
            }

            validate_window(&record.meta)?;
            if data_changed {
                record.data.validate_references(&self.db, &conn).await?;
            }
            record.meta.touch(user, now);

            self.db.db_update_record(&conn, kind, &record).await?;
            self.db
                .db_insert_history::<E::Data>(
                    &conn,
                    kind,
                    id,
                    &HistoryStamp {
                        history_type: HistoryType::Changed,
                        date: now,
                        user_id: Some(user),
                        change_reason: None,
                    },
                )
                .await?;
            Ok((record, true))
        }
        .await;
        let (record, changed) = self.db.finish_transaction(&conn, result).await?;

        if changed {
            tracing::info!("Updated {} {} to version {}", kind, id, record.meta.version);
        } else {
            tracing::debug!("Update of {} {} changed nothing", kind, id);
        }
        self.notify(kind, &[id], mutation_id).await;
        Ok(record)
    }

    /// Soft-delete entities by id
    ///
    /// Duplicate ids are collapsed. If any id does not resolve to a
    /// non-deleted row the whole call fails and nothing is written.
    #[instrument(skip(self, caller, ids), fields(kind = %E::KIND, count = ids.len()))]
    pub async fn delete<E>(
        &self,
        caller: &Caller,
        ids: &[Uuid],
        mutation_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Delete)?;
        let user = Self::require_user(caller)?;

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(ValidationError::MissingField("uuids".to_string()).into());
        }
        let now = now_utc();

        let conn = self.db.connect_with_timeout().await?;
        self.db.begin(&conn).await?;
        let result: Result<(), PlanServiceError> = async {
            for id in &ids {
                let mut record = self
                    .db
                    .db_get_record::<E::Data>(&conn, kind, *id)
                    .await?
                    .filter(|r| !r.meta.is_deleted)
                    .ok_or_else(|| PlanServiceError::not_found(kind, *id))?;

                record.meta.is_deleted = true;
                record.meta.date_updated = now;
                record.meta.user_updated = user;

                self.db.db_update_record(&conn, kind, &record).await?;
                self.db
                    .db_insert_history::<E::Data>(
                        &conn,
                        kind,
                        *id,
                        &HistoryStamp {
                            history_type: HistoryType::Deleted,
                            date: now,
                            user_id: Some(user),
                            change_reason: None,
                        },
                    )
                    .await?;
            }
            Ok(())
        }
        .await;
        self.db.finish_transaction(&conn, result).await?;

        tracing::info!("Deleted {} {} row(s)", ids.len(), kind);
        self.notify(kind, &ids, mutation_id).await;
        Ok(ids)
    }

    /// Replace an active entity with a new version of itself
    ///
    /// The successor starts at version 1 with the predecessor's fields
    /// overlaid by the input. The predecessor's window closes at the instant
    /// the successor's opens and its `replacement_uuid` points to it. The
    /// successor's own window is always open-ended.
    #[instrument(skip(self, caller, input), fields(kind = %E::KIND, id = ?input.id))]
    pub async fn replace<E>(
        &self,
        caller: &Caller,
        input: EntityInput<PatchOf<E>>,
        mutation_id: Option<Uuid>,
    ) -> Result<Replacement<E::Data>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Replace)?;
        let user = Self::require_user(caller)?;
        let id = input
            .id
            .ok_or_else(|| ValidationError::MissingField("uuid".to_string()))?;
        if matches!(input.business.date_valid_to, Some(Some(_))) {
            return Err(ValidationError::InvalidValue {
                field: "dateValidTo".to_string(),
                reason: "a replacement stays open until it is replaced itself".to_string(),
            }
            .into());
        }
        let now = now_utc();

        let conn = self.db.connect_with_timeout().await?;
        self.db.begin(&conn).await?;
        let result: Result<Replacement<E::Data>, PlanServiceError> = async {
            let mut predecessor = self
                .db
                .db_get_record::<E::Data>(&conn, kind, id)
                .await?
                .filter(|r| !r.meta.is_deleted)
                .ok_or_else(|| PlanServiceError::not_found(kind, id))?;
            if !predecessor.meta.is_active_at(now) {
                return Err(PlanServiceError::not_active(kind, id));
            }

            let mut data = predecessor.data.clone();
            data.apply_patch(&input.fields);
            let mut meta = BusinessMeta::new(user, now);
            meta.json_ext = predecessor.meta.json_ext.clone();
            meta.apply_input(&input.business);
            validate_window(&meta)?;
            if meta.date_valid_from < predecessor.meta.date_valid_from {
                return Err(ValidationError::InvalidValue {
                    field: "dateValidFrom".to_string(),
                    reason: "must not precede the replaced version".to_string(),
                }
                .into());
            }
            let successor = Record { meta, data };
            successor.data.validate_references(&self.db, &conn).await?;

            self.db.db_insert_record(&conn, kind, &successor).await?;
            self.db
                .db_insert_history::<E::Data>(
                    &conn,
                    kind,
                    successor.meta.id,
                    &HistoryStamp {
                        history_type: HistoryType::Created,
                        date: now,
                        user_id: Some(user),
                        change_reason: None,
                    },
                )
                .await?;

            predecessor.meta.replacement_uuid = Some(successor.meta.id);
            predecessor.meta.date_valid_to = Some(successor.meta.date_valid_from);
            predecessor.meta.touch(user, now);
            self.db.db_update_record(&conn, kind, &predecessor).await?;
            self.db
                .db_insert_history::<E::Data>(
                    &conn,
                    kind,
                    id,
                    &HistoryStamp {
                        history_type: HistoryType::Changed,
                        date: now,
                        user_id: Some(user),
                        change_reason: Some("replaced"),
                    },
                )
                .await?;

            Ok(Replacement {
                predecessor,
                successor,
            })
        }
        .await;
        let replacement = self.db.finish_transaction(&conn, result).await?;

        tracing::info!(
            "Replaced {} {} with {}",
            kind,
            id,
            replacement.successor.meta.id
        );
        self.notify(kind, &[id, replacement.successor.meta.id], mutation_id)
            .await;
        Ok(replacement)
    }

    /// Fetch one entity by id, including deleted and closed rows
    pub async fn get<E>(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Option<Record<E::Data>>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        authorize(caller, E::KIND, Operation::Query)?;
        if self.hides_rows_from(caller) {
            return Ok(None);
        }
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.db.db_get_record::<E::Data>(&conn, E::KIND, id).await?)
    }

    /// Filtered, ordered, paginated query
    ///
    /// Permission check first, then row security and validity predicates.
    /// A missing `limit` falls back to the configured default page size.
    #[instrument(skip(self, caller, filter), fields(kind = %E::KIND))]
    pub async fn query<E>(
        &self,
        caller: &Caller,
        filter: EntityFilter,
    ) -> Result<Page<Record<E::Data>>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Query)?;
        validate_filter::<E::Data>(kind, &filter)?;

        let predicates =
            row_security_predicates(caller, &filter, self.config.row_security, now_utc());
        let mut filter = filter;
        filter.limit = Some(self.config.page_size(filter.limit));
        let offset = filter.offset.unwrap_or(0);

        let conn = self.db.connect_with_timeout().await?;
        let (items, total_count) = self
            .db
            .db_query_records::<E::Data>(&conn, kind, &filter, &predicates)
            .await?;

        tracing::debug!("{} query returned {} of {}", kind, items.len(), total_count);
        Ok(Page {
            items,
            total_count,
            offset,
        })
    }

    /// History of one row id, newest first
    ///
    /// History stays keyed by row id; use [`Self::replacement_chain`] to walk
    /// from a replaced row to its successors.
    pub async fn history<E>(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Vec<HistoryEntry<E::Data>>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        authorize(caller, E::KIND, Operation::Query)?;
        if self.hides_rows_from(caller) {
            return Ok(Vec::new());
        }
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.db.db_get_history::<E::Data>(&conn, E::KIND, id).await?)
    }

    /// The row `id` followed by each successor via `replacement_uuid`
    pub async fn replacement_chain<E>(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Vec<Record<E::Data>>, PlanServiceError>
    where
        E: Entity,
        E::Data: StoredData,
    {
        let kind = E::KIND;
        authorize(caller, kind, Operation::Query)?;
        if self.hides_rows_from(caller) {
            return Ok(Vec::new());
        }

        let conn = self.db.connect_with_timeout().await?;
        let mut chain: Vec<Record<E::Data>> = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(id);

        while let Some(current) = next {
            if !visited.insert(current) {
                tracing::warn!("Replacement cycle detected at {} {}", kind, current);
                break;
            }
            let record = self
                .db
                .db_get_record::<E::Data>(&conn, kind, current)
                .await?
                .ok_or_else(|| PlanServiceError::not_found(kind, current))?;
            next = record.meta.replacement_uuid;
            chain.push(record);
        }

        Ok(chain)
    }

    /// Contribution length of a plan: its periodicity, adjusted by the hook
    pub fn contribution_length(&self, plan: &ContributionPlanRecord) -> i64 {
        let length = plan.data.periodicity;
        match &self.contribution_length_hook {
            Some(hook) => hook(plan, length),
            None => length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BundleDetailsPatch, BundlePatch, BusinessInput, ContributionPlan, ContributionPlanBundle,
        ContributionPlanBundleDetails, FieldFilter, PaymentPlan, PlanPatch,
    };
    use crate::services::security::{PLAN_CREATE, PLAN_QUERY};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup() -> (PlanService, Caller, i64, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let product = db.db_insert_product("BP", "Benefit plan", Some(12)).await.unwrap();
        let service = PlanService::new(Arc::new(db), PlanConfig::default());
        (service, Caller::superuser(Uuid::new_v4()), product.id, temp_dir)
    }

    fn plan_input(code: &str, product_id: i64) -> EntityInput<PlanPatch> {
        EntityInput::new(
            PlanPatch::new()
                .with_code(code)
                .with_name("Plan")
                .with_calculation(Uuid::new_v4())
                .with_benefit_plan_id(product_id)
                .with_periodicity(12),
        )
    }

    #[tokio::test]
    async fn test_create_starts_at_version_one_with_history() {
        let (service, caller, product_id, _tmp) = setup().await;

        let plan = service
            .create::<ContributionPlan>(&caller, plan_input("XYZ", product_id), None)
            .await
            .unwrap();

        assert_eq!(plan.meta.version, 1);
        assert_eq!(plan.data.code.as_deref(), Some("XYZ"));
        assert_eq!(plan.meta.user_created, caller.user_id.unwrap());

        let history = service
            .history::<ContributionPlan>(&caller, plan.meta.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].history_type, HistoryType::Created);
        assert_eq!(history[0].record, plan);
    }

    #[tokio::test]
    async fn test_create_missing_fields_inserts_nothing() {
        let (service, caller, _product_id, _tmp) = setup().await;

        let err = service
            .create::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new().with_code("XYZ")),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::ValidationFailed(_)));

        let page = service
            .query::<ContributionPlan>(&caller, EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_product() {
        let (service, caller, product_id, _tmp) = setup().await;

        let err = service
            .create::<PaymentPlan>(&caller, plan_input("PP", product_id + 1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_change() {
        let (service, caller, product_id, _tmp) = setup().await;
        let plan = service
            .create::<ContributionPlan>(&caller, plan_input("XYZ", product_id), None)
            .await
            .unwrap();

        let same = EntityInput::new(PlanPatch::new().with_name("Plan")).with_id(plan.meta.id);
        let unchanged = service
            .update::<ContributionPlan>(&caller, same, None)
            .await
            .unwrap();
        assert_eq!(unchanged.meta.version, 1);

        let renamed =
            EntityInput::new(PlanPatch::new().with_name("Renamed")).with_id(plan.meta.id);
        let updated = service
            .update::<ContributionPlan>(&caller, renamed, None)
            .await
            .unwrap();
        assert_eq!(updated.meta.version, 2);
        assert_eq!(updated.data.name.as_deref(), Some("Renamed"));

        let history = service
            .history::<ContributionPlan>(&caller, plan.meta.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].history_type, HistoryType::Changed);
        assert_eq!(history[0].record.meta.version, 2);
    }

    #[tokio::test]
    async fn test_update_requires_id_and_live_row() {
        let (service, caller, product_id, _tmp) = setup().await;

        let err = service
            .update::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new().with_name("x")),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlanServiceError::ValidationFailed(ValidationError::MissingField(_))
        ));

        let plan = service
            .create::<ContributionPlan>(&caller, plan_input("XYZ", product_id), None)
            .await
            .unwrap();
        service
            .delete::<ContributionPlan>(&caller, &[plan.meta.id], None)
            .await
            .unwrap();

        let err = service
            .update::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new().with_name("x")).with_id(plan.meta.id),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_keeps_version_and_hides_rows() {
        let (service, caller, product_id, _tmp) = setup().await;
        let a = service
            .create::<ContributionPlan>(&caller, plan_input("A", product_id), None)
            .await
            .unwrap();
        let b = service
            .create::<ContributionPlan>(&caller, plan_input("B", product_id), None)
            .await
            .unwrap();

        let deleted = service
            .delete::<ContributionPlan>(&caller, &[a.meta.id, b.meta.id, a.meta.id], None)
            .await
            .unwrap();
        assert_eq!(deleted, vec![a.meta.id, b.meta.id]);

        let live = service
            .query::<ContributionPlan>(&caller, EntityFilter::new().with_is_deleted(false))
            .await
            .unwrap();
        assert_eq!(live.total_count, 0);

        let gone = service
            .query::<ContributionPlan>(&caller, EntityFilter::new().with_is_deleted(true))
            .await
            .unwrap();
        assert_eq!(gone.total_count, 2);
        assert!(gone.items.iter().all(|r| r.meta.version == 1 && r.meta.is_deleted));
    }

    #[tokio::test]
    async fn test_delete_with_unknown_id_writes_nothing() {
        let (service, caller, product_id, _tmp) = setup().await;
        let a = service
            .create::<ContributionPlan>(&caller, plan_input("A", product_id), None)
            .await
            .unwrap();

        let err = service
            .delete::<ContributionPlan>(&caller, &[a.meta.id, Uuid::new_v4()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::NotFound { .. }));

        let stored = service
            .get::<ContributionPlan>(&caller, a.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.meta.is_deleted);
    }

    #[tokio::test]
    async fn test_replace_closes_predecessor_and_links_successor() {
        let (service, caller, product_id, _tmp) = setup().await;
        let original = service
            .create::<ContributionPlan>(&caller, plan_input("XYZ", product_id), None)
            .await
            .unwrap();

        let replacement = service
            .replace::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new().with_periodicity(6)).with_id(original.meta.id),
                None,
            )
            .await
            .unwrap();

        let successor = &replacement.successor;
        let predecessor = &replacement.predecessor;
        assert_ne!(successor.meta.id, original.meta.id);
        assert_eq!(successor.meta.version, 1);
        assert_eq!(successor.data.periodicity, 6);
        assert_eq!(successor.data.code.as_deref(), Some("XYZ"));
        assert_eq!(successor.meta.replacement_uuid, None);

        assert_eq!(predecessor.meta.replacement_uuid, Some(successor.meta.id));
        assert_eq!(predecessor.meta.date_valid_to, Some(successor.meta.date_valid_from));
        assert_eq!(predecessor.meta.version, 2);

        let active = service
            .query::<ContributionPlan>(&caller, EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(active.total_count, 1);
        assert_eq!(active.items[0].meta.id, successor.meta.id);

        let chain = service
            .replacement_chain::<ContributionPlan>(&caller, original.meta.id)
            .await
            .unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|r| r.meta.id).collect();
        assert_eq!(ids, vec![original.meta.id, successor.meta.id]);

        let err = service
            .replace::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new()).with_id(original.meta.id),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::NotActive { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_replaced_row() {
        let (service, caller, product_id, _tmp) = setup().await;
        let original = service
            .create::<ContributionPlan>(&caller, plan_input("ONE", product_id), None)
            .await
            .unwrap();
        service
            .replace::<ContributionPlan>(
                &caller,
                EntityInput::new(PlanPatch::new()).with_id(original.meta.id),
                None,
            )
            .await
            .unwrap();

        let reopen = EntityInput::new(PlanPatch::new())
            .with_id(original.meta.id)
            .with_business(BusinessInput {
                date_valid_to: Some(None),
                ..Default::default()
            });
        let err = service
            .update::<ContributionPlan>(&caller, reopen, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::NotActive { .. }));

        let active = service
            .query::<ContributionPlan>(&caller, EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(active.total_count, 1);
        assert_ne!(active.items[0].meta.id, original.meta.id);

        let closed = service
            .get::<ContributionPlan>(&caller, original.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.meta.version, 2);
        assert!(closed.meta.date_valid_to.is_some());
    }

    #[tokio::test]
    async fn test_replace_rejects_closed_successor_window() {
        let (service, caller, product_id, _tmp) = setup().await;
        let original = service
            .create::<ContributionPlan>(&caller, plan_input("TWO", product_id), None)
            .await
            .unwrap();

        let closed = EntityInput::new(PlanPatch::new())
            .with_id(original.meta.id)
            .with_business(BusinessInput {
                date_valid_to: Some(Some(now_utc() + Duration::days(30))),
                ..Default::default()
            });
        let err = service
            .replace::<ContributionPlan>(&caller, closed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::ValidationFailed(_)));

        let untouched = service
            .get::<ContributionPlan>(&caller, original.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.meta.version, 1);
        assert_eq!(untouched.meta.replacement_uuid, None);
        let chain = service
            .replacement_chain::<ContributionPlan>(&caller, original.meta.id)
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_validity_filter_can_be_disabled() {
        let (service, caller, product_id, _tmp) = setup().await;
        let mut input = plan_input("OLD", product_id);
        let past = now_utc() - Duration::days(30);
        input.business = BusinessInput {
            date_valid_from: Some(past - Duration::days(30)),
            date_valid_to: Some(Some(past)),
            ..Default::default()
        };
        service
            .create::<ContributionPlan>(&caller, input, None)
            .await
            .unwrap();

        let default = service
            .query::<ContributionPlan>(&caller, EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(default.total_count, 0);

        let all = service
            .query::<ContributionPlan>(
                &caller,
                EntityFilter::new().with_default_validity_filter(false),
            )
            .await
            .unwrap();
        assert_eq!(all.total_count, 1);

        let bounded = service
            .query::<ContributionPlan>(
                &caller,
                EntityFilter::new().with_date_valid_to_lte(now_utc()),
            )
            .await
            .unwrap();
        assert_eq!(bounded.total_count, 1);
    }

    #[tokio::test]
    async fn test_bundle_filters_traverse_details_without_duplicates() {
        let (service, caller, product_id, _tmp) = setup().await;
        let bundle = service
            .create::<ContributionPlanBundle>(
                &caller,
                EntityInput::new(BundlePatch::new().with_code("BUNDLE")),
                None,
            )
            .await
            .unwrap();
        let calculation = Uuid::new_v4();
        for code in ["P1", "P2"] {
            let mut input = plan_input(code, product_id);
            input.fields.calculation = Some(calculation);
            let plan = service
                .create::<ContributionPlan>(&caller, input, None)
                .await
                .unwrap();
            service
                .create::<ContributionPlanBundleDetails>(
                    &caller,
                    EntityInput::new(BundleDetailsPatch::new(bundle.meta.id, plan.meta.id)),
                    None,
                )
                .await
                .unwrap();
        }

        let by_calculation = service
            .query::<ContributionPlanBundle>(&caller, EntityFilter::new().with_calculation(calculation))
            .await
            .unwrap();
        assert_eq!(by_calculation.total_count, 1);
        assert_eq!(by_calculation.items[0].meta.id, bundle.meta.id);

        let by_product = service
            .query::<ContributionPlanBundle>(
                &caller,
                EntityFilter::new().with_insurance_product(product_id + 1),
            )
            .await
            .unwrap();
        assert_eq!(by_product.total_count, 0);

        let err = service
            .query::<ContributionPlan>(&caller, EntityFilter::new().with_calculation(calculation))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_details_reject_deleted_plan() {
        let (service, caller, product_id, _tmp) = setup().await;
        let bundle = service
            .create::<ContributionPlanBundle>(
                &caller,
                EntityInput::new(BundlePatch::new().with_code("B")),
                None,
            )
            .await
            .unwrap();
        let plan = service
            .create::<ContributionPlan>(&caller, plan_input("P", product_id), None)
            .await
            .unwrap();
        service
            .delete::<ContributionPlan>(&caller, &[plan.meta.id], None)
            .await
            .unwrap();

        let err = service
            .create::<ContributionPlanBundleDetails>(
                &caller,
                EntityInput::new(BundleDetailsPatch::new(bundle.meta.id, plan.meta.id)),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_permissions_checked_before_query() {
        let (service, _superuser, _product_id, _tmp) = setup().await;
        let creator = Caller::user(Uuid::new_v4(), [PLAN_CREATE]);

        let err = service
            .query::<ContributionPlan>(&creator, EntityFilter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanServiceError::PermissionDenied { .. }));

        // Permission without identity: allowed through, but row security hides everything
        let service_token = Caller {
            user_id: None,
            is_superuser: false,
            permissions: [PLAN_QUERY.to_string()].into_iter().collect(),
        };
        let page = service
            .query::<ContributionPlan>(&service_token, EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_filters_and_pagination() {
        let (service, caller, product_id, _tmp) = setup().await;
        for code in ["ALPHA", "BETA", "GAMMA"] {
            service
                .create::<ContributionPlan>(&caller, plan_input(code, product_id), None)
                .await
                .unwrap();
        }

        let filter = EntityFilter::new()
            .with_field_filter(FieldFilter::new(
                "code",
                crate::models::FilterOperator::IContains,
                "a",
            ))
            .with_order_by(crate::models::OrderBy::asc("code"))
            .with_limit(2);
        let page = service.query::<ContributionPlan>(&caller, filter).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next_page());
        assert_eq!(page.items[0].data.code.as_deref(), Some("ALPHA"));

        let err = service
            .query::<ContributionPlan>(
                &caller,
                EntityFilter::new().with_field_filter(FieldFilter::equals("colour", "red")),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlanServiceError::ValidationFailed(ValidationError::UnknownField(_))
        ));
    }

    #[tokio::test]
    async fn test_contribution_length_hook() {
        let (service, caller, product_id, _tmp) = setup().await;
        let plan = service
            .create::<ContributionPlan>(&caller, plan_input("XYZ", product_id), None)
            .await
            .unwrap();

        assert_eq!(service.contribution_length(&plan), 12);

        let hooked = service.with_contribution_length_hook(Arc::new(
            |_: &ContributionPlanRecord, length: i64| length + 1,
        ));
        assert_eq!(hooked.contribution_length(&plan), 13);
    }
}
