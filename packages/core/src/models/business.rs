//! Versioned Business Entity Shape
//!
//! Every table in this module shares the same "history business model"
//! columns: UUID identity, soft-delete flag, optimistic version counter,
//! validity window, replacement link, audit fields and a free-form
//! `json_ext` bag. Entity-specific data lives beside it in a [`Record`].
//!
//! # Lifecycle
//!
//! - Created with `version = 1` and `date_valid_from = now` unless supplied
//! - Updated in place (version + 1) or replaced (new row, predecessor closed)
//! - Destroyed only logically via `is_deleted = true`

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for entity inputs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown filter or order field: {0}")]
    UnknownField(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Current time truncated to the microsecond precision the store keeps
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// The four entity kinds managed by this module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ContributionPlan,
    ContributionPlanBundle,
    ContributionPlanBundleDetails,
    PaymentPlan,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::ContributionPlan,
        EntityKind::ContributionPlanBundle,
        EntityKind::ContributionPlanBundleDetails,
        EntityKind::PaymentPlan,
    ];

    /// Stable identifier used in logs and the mutation log
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ContributionPlan => "contribution_plan",
            EntityKind::ContributionPlanBundle => "contribution_plan_bundle",
            EntityKind::ContributionPlanBundleDetails => "contribution_plan_bundle_details",
            EntityKind::PaymentPlan => "payment_plan",
        }
    }

    /// Storage table holding the live rows
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::ContributionPlan => "tblContributionPlan",
            EntityKind::ContributionPlanBundle => "tblContributionPlanBundle",
            EntityKind::ContributionPlanBundleDetails => "tblContributionPlanBundleDetails",
            EntityKind::PaymentPlan => "tblPaymentPlan",
        }
    }

    /// Shadow table holding immutable history snapshots
    pub fn history_table(&self) -> &'static str {
        match self {
            EntityKind::ContributionPlan => "tblContributionPlan_history",
            EntityKind::ContributionPlanBundle => "tblContributionPlanBundle_history",
            EntityKind::ContributionPlanBundleDetails => "tblContributionPlanBundleDetails_history",
            EntityKind::PaymentPlan => "tblPaymentPlan_history",
        }
    }

    /// Table linking mutation log entries to affected rows, with its FK column
    ///
    /// Only plans and bundles keep mutation links.
    pub fn mutation_link(&self) -> Option<(&'static str, &'static str)> {
        match self {
            EntityKind::ContributionPlan => Some((
                "contribution_plan_ContributionPlanMutation",
                "contribution_plan_id",
            )),
            EntityKind::ContributionPlanBundle => Some((
                "contribution_plan_bundle_ContributionPlanBundleMutation",
                "contribution_plan_bundle_id",
            )),
            EntityKind::ContributionPlanBundleDetails | EntityKind::PaymentPlan => None,
        }
    }

    /// GraphQL object type name, also the prefix of relay global ids
    pub fn graphql_type_name(&self) -> &'static str {
        match self {
            EntityKind::ContributionPlan => "ContributionPlanGQLType",
            EntityKind::ContributionPlanBundle => "ContributionPlanBundleGQLType",
            EntityKind::ContributionPlanBundleDetails => "ContributionPlanBundleDetailsGQLType",
            EntityKind::PaymentPlan => "PaymentPlanGQLType",
        }
    }

    pub fn from_graphql_type_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.graphql_type_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change recorded in a history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryType {
    /// `+`
    Created,
    /// `~`
    Changed,
    /// `-`
    Deleted,
}

impl HistoryType {
    pub fn as_tag(&self) -> &'static str {
        match self {
            HistoryType::Created => "+",
            HistoryType::Changed => "~",
            HistoryType::Deleted => "-",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "+" => Some(HistoryType::Created),
            "~" => Some(HistoryType::Changed),
            "-" => Some(HistoryType::Deleted),
            _ => None,
        }
    }
}

/// Columns shared by every versioned business entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessMeta {
    /// Immutable identity
    pub id: Uuid,

    /// Soft-delete flag; deleted rows are hidden from default queries
    pub is_deleted: bool,

    /// Incremented on every field-changing update, never reset
    pub version: i64,

    pub date_valid_from: DateTime<Utc>,

    /// `None` while this row is the active version of its identity
    pub date_valid_to: Option<DateTime<Utc>>,

    /// Successor created by a replace operation
    pub replacement_uuid: Option<Uuid>,

    /// Schema-less extension bag
    pub json_ext: Option<serde_json::Value>,

    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub user_created: Uuid,
    pub user_updated: Uuid,
}

impl BusinessMeta {
    /// Fresh metadata for a newly created row owned by `user`
    pub fn new(user: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            is_deleted: false,
            version: 1,
            date_valid_from: now,
            date_valid_to: None,
            replacement_uuid: None,
            json_ext: None,
            date_created: now,
            date_updated: now,
            user_created: user,
            user_updated: user,
        }
    }

    /// True when the row is neither deleted, replaced nor closed at `at`
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        !self.is_deleted
            && self.replacement_uuid.is_none()
            && self.date_valid_to.map_or(true, |to| to > at)
    }

    /// Applies the shared-field part of a mutation input, returning whether
    /// anything changed
    pub fn apply_input(&mut self, input: &BusinessInput) -> bool {
        let mut changed = false;
        if let Some(ref json_ext) = input.json_ext {
            if self.json_ext != *json_ext {
                self.json_ext = json_ext.clone();
                changed = true;
            }
        }
        if let Some(from) = input.date_valid_from {
            if self.date_valid_from != from {
                self.date_valid_from = from;
                changed = true;
            }
        }
        if let Some(to) = input.date_valid_to {
            if self.date_valid_to != to {
                self.date_valid_to = to;
                changed = true;
            }
        }
        changed
    }

    /// Records an audited change by `user`
    pub fn touch(&mut self, user: Uuid, now: DateTime<Utc>) {
        self.version += 1;
        self.date_updated = now;
        self.user_updated = user;
    }
}

/// A persisted entity: shared business columns plus entity data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<D> {
    #[serde(flatten)]
    pub meta: BusinessMeta,
    #[serde(flatten)]
    pub data: D,
}

impl<D> Record<D> {
    pub fn id(&self) -> Uuid {
        self.meta.id
    }
}

/// Immutable snapshot of a row taken after a create, update or delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry<D> {
    pub history_id: i64,
    pub history_date: DateTime<Utc>,
    pub history_type: HistoryType,
    pub history_change_reason: Option<String>,
    pub history_user_id: Option<Uuid>,
    pub record: Record<D>,
}

/// Entity-specific payload of a [`Record`]
pub trait EntityData: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Partial field set used by create, update and replace
    type Patch: Clone + fmt::Debug + Default + Send + Sync + Serialize + 'static;

    /// Builds a complete value, failing on missing required fields
    fn from_patch(patch: &Self::Patch) -> Result<Self, ValidationError>;

    /// Applies the fields present in `patch`, returning whether any value changed
    fn apply_patch(&mut self, patch: &Self::Patch) -> bool;
}

/// Marker binding an [`EntityKind`] to its data type
pub trait Entity: Send + Sync + 'static {
    const KIND: EntityKind;
    type Data: EntityData;
}

/// Shared-field part of create, update and replace inputs
///
/// Nullable fields use the double-Option pattern:
/// - `None`: leave unchanged
/// - `Some(None)`: clear
/// - `Some(Some(v))`: set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInput {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub json_ext: Option<Option<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_valid_from: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub date_valid_to: Option<Option<DateTime<Utc>>>,
}

/// Input for create, update and replace mutations
///
/// `id` is ignored by create and required by update and replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInput<P> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(flatten)]
    pub business: BusinessInput,

    #[serde(flatten)]
    pub fields: P,
}

impl<P> EntityInput<P> {
    pub fn new(fields: P) -> Self {
        Self {
            id: None,
            business: BusinessInput::default(),
            fields,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_business(mut self, business: BusinessInput) -> Self {
        self.business = business;
        self
    }
}

/// Distinguishes a missing field from an explicit `null`
///
/// - Missing field → None (don't update)
/// - null → Some(None) (set to NULL)
/// - "value" → Some(Some("value")) (set to value)
pub(crate) fn deserialize_optional_field<'de, D, T>(
    deserializer: D,
) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Sets `slot` to `value` when they differ
pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_meta_starts_at_version_one() {
        let user = Uuid::new_v4();
        let now = now_utc();
        let meta = BusinessMeta::new(user, now);

        assert_eq!(meta.version, 1);
        assert_eq!(meta.date_valid_from, now);
        assert!(meta.date_valid_to.is_none());
        assert_eq!(meta.user_created, user);
        assert!(meta.is_active_at(now));
    }

    #[test]
    fn test_closed_or_replaced_meta_is_inactive() {
        let now = now_utc();
        let mut meta = BusinessMeta::new(Uuid::new_v4(), now);

        meta.date_valid_to = Some(now);
        assert!(!meta.is_active_at(now));
        assert!(meta.is_active_at(now - Duration::seconds(1)));

        meta.date_valid_to = None;
        meta.replacement_uuid = Some(Uuid::new_v4());
        assert!(!meta.is_active_at(now));
    }

    #[test]
    fn test_apply_input_reports_changes_only() {
        let now = now_utc();
        let mut meta = BusinessMeta::new(Uuid::new_v4(), now);

        let same = BusinessInput {
            date_valid_from: Some(now),
            ..Default::default()
        };
        assert!(!meta.apply_input(&same));

        let cleared_ext = BusinessInput {
            json_ext: Some(Some(serde_json::json!({"source": "import"}))),
            ..Default::default()
        };
        assert!(meta.apply_input(&cleared_ext));
        assert!(!meta.apply_input(&cleared_ext));
    }

    #[test]
    fn test_business_input_double_option() {
        let missing: BusinessInput = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.date_valid_to, None);

        let null: BusinessInput = serde_json::from_str(r#"{"dateValidTo": null}"#).unwrap();
        assert_eq!(null.date_valid_to, Some(None));
    }

    #[test]
    fn test_kind_graphql_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(
                EntityKind::from_graphql_type_name(kind.graphql_type_name()),
                Some(kind)
            );
        }
        assert_eq!(HistoryType::from_tag("~"), Some(HistoryType::Changed));
        assert_eq!(HistoryType::from_tag("?"), None);
    }
}
