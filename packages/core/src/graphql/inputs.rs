//! GraphQL mutation inputs and their conversion to service inputs
//!
//! Nullable update fields use `MaybeUndefined` so an omitted field leaves the
//! column unchanged while an explicit `null` clears it.

use async_graphql::{InputObject, MaybeUndefined};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::global_id::parse_id;
use crate::models::{
    BundleDetailsPatch, BundlePatch, BusinessInput, EntityInput, EntityKind, PlanPatch,
    ValidationError,
};

fn tristate<T>(value: MaybeUndefined<T>) -> Option<Option<T>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(v) => Some(Some(v)),
    }
}

fn parse_json_ext(raw: &str) -> Result<serde_json::Value, ValidationError> {
    serde_json::from_str(raw).map_err(|e| ValidationError::InvalidValue {
        field: "jsonExt".to_string(),
        reason: e.to_string(),
    })
}

fn business(
    date_valid_from: Option<DateTime<Utc>>,
    date_valid_to: MaybeUndefined<DateTime<Utc>>,
    json_ext: MaybeUndefined<String>,
) -> Result<BusinessInput, ValidationError> {
    let json_ext = match tristate(json_ext) {
        Some(Some(raw)) => Some(Some(parse_json_ext(&raw)?)),
        Some(None) => Some(None),
        None => None,
    };
    Ok(BusinessInput {
        json_ext,
        date_valid_from,
        date_valid_to: tristate(date_valid_to),
    })
}

fn target_id(raw: Option<&str>, kind: EntityKind) -> Result<Option<Uuid>, ValidationError> {
    raw.map(|value| parse_id(value, kind)).transpose()
}

/// Client-supplied id and label recorded with a mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientMutation {
    pub id: Option<String>,
    pub label: Option<String>,
}

impl ClientMutation {
    fn new(id: &Option<String>, label: &Option<String>) -> Self {
        Self {
            id: id.clone(),
            label: label.clone(),
        }
    }
}

/// Create, update or replace a contribution plan or payment plan
///
/// `id` is the target row for update and replace (raw UUID or global id).
#[derive(InputObject, Debug, Clone, Default)]
pub struct PlanMutationInput {
    pub id: Option<String>,
    pub client_mutation_id: Option<String>,
    pub client_mutation_label: Option<String>,
    pub code: MaybeUndefined<String>,
    pub name: MaybeUndefined<String>,
    pub calculation: Option<Uuid>,
    pub benefit_plan_id: Option<i64>,
    pub periodicity: Option<i64>,
    pub date_valid_from: Option<DateTime<Utc>>,
    pub date_valid_to: MaybeUndefined<DateTime<Utc>>,
    /// JSON-encoded extension bag
    pub json_ext: MaybeUndefined<String>,
}

impl PlanMutationInput {
    pub fn client_mutation(&self) -> ClientMutation {
        ClientMutation::new(&self.client_mutation_id, &self.client_mutation_label)
    }

    pub fn into_entity_input(
        self,
        kind: EntityKind,
    ) -> Result<EntityInput<PlanPatch>, ValidationError> {
        let id = target_id(self.id.as_deref(), kind)?;
        let patch = PlanPatch {
            code: tristate(self.code),
            name: tristate(self.name),
            calculation: self.calculation,
            benefit_plan_id: self.benefit_plan_id,
            periodicity: self.periodicity,
        };
        let mut input = EntityInput::new(patch)
            .with_business(business(self.date_valid_from, self.date_valid_to, self.json_ext)?);
        input.id = id;
        Ok(input)
    }
}

#[derive(InputObject, Debug, Clone, Default)]
pub struct BundleMutationInput {
    pub id: Option<String>,
    pub client_mutation_id: Option<String>,
    pub client_mutation_label: Option<String>,
    pub code: Option<String>,
    pub name: MaybeUndefined<String>,
    pub periodicity: MaybeUndefined<i64>,
    pub date_valid_from: Option<DateTime<Utc>>,
    pub date_valid_to: MaybeUndefined<DateTime<Utc>>,
    pub json_ext: MaybeUndefined<String>,
}

impl BundleMutationInput {
    pub fn client_mutation(&self) -> ClientMutation {
        ClientMutation::new(&self.client_mutation_id, &self.client_mutation_label)
    }

    pub fn into_entity_input(self) -> Result<EntityInput<BundlePatch>, ValidationError> {
        let id = target_id(self.id.as_deref(), EntityKind::ContributionPlanBundle)?;
        let patch = BundlePatch {
            code: self.code,
            name: tristate(self.name),
            periodicity: tristate(self.periodicity),
        };
        let mut input = EntityInput::new(patch)
            .with_business(business(self.date_valid_from, self.date_valid_to, self.json_ext)?);
        input.id = id;
        Ok(input)
    }
}

#[derive(InputObject, Debug, Clone)]
pub struct BundleDetailsMutationInput {
    pub id: Option<String>,
    pub client_mutation_id: Option<String>,
    pub client_mutation_label: Option<String>,
    pub contribution_plan_bundle_id: Option<String>,
    pub contribution_plan_id: Option<String>,
    pub date_valid_from: Option<DateTime<Utc>>,
    pub date_valid_to: MaybeUndefined<DateTime<Utc>>,
    pub json_ext: MaybeUndefined<String>,
}

impl BundleDetailsMutationInput {
    pub fn client_mutation(&self) -> ClientMutation {
        ClientMutation::new(&self.client_mutation_id, &self.client_mutation_label)
    }

    pub fn into_entity_input(self) -> Result<EntityInput<BundleDetailsPatch>, ValidationError> {
        let id = target_id(self.id.as_deref(), EntityKind::ContributionPlanBundleDetails)?;
        let patch = BundleDetailsPatch {
            contribution_plan_bundle_id: target_id(
                self.contribution_plan_bundle_id.as_deref(),
                EntityKind::ContributionPlanBundle,
            )?,
            contribution_plan_id: target_id(
                self.contribution_plan_id.as_deref(),
                EntityKind::ContributionPlan,
            )?,
        };
        let mut input = EntityInput::new(patch)
            .with_business(business(self.date_valid_from, self.date_valid_to, self.json_ext)?);
        input.id = id;
        Ok(input)
    }
}

#[derive(InputObject, Debug, Clone)]
pub struct DeleteInput {
    /// Raw UUIDs or global ids of the rows to delete
    pub uuids: Vec<String>,
    pub client_mutation_id: Option<String>,
    pub client_mutation_label: Option<String>,
}

impl DeleteInput {
    pub fn client_mutation(&self) -> ClientMutation {
        ClientMutation::new(&self.client_mutation_id, &self.client_mutation_label)
    }

    pub fn parse_ids(&self, kind: EntityKind) -> Result<Vec<Uuid>, ValidationError> {
        self.uuids.iter().map(|value| parse_id(value, kind)).collect()
    }
}
