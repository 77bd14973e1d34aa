//! Contribution and Payment Plans
//!
//! Both plan kinds share one shape: an optional code and name, a required
//! reference to an external calculation rule, a required benefit plan
//! (product) and a required periodicity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::business::{assign, deserialize_optional_field, Entity, EntityData, EntityKind, Record};
use super::ValidationError;

/// Entity data of `tblContributionPlan` and `tblPaymentPlan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanData {
    pub code: Option<String>,
    pub name: Option<String>,

    /// External calculation rule, not resolved by this module
    pub calculation: Uuid,

    /// `tblProduct.ProdID`
    pub benefit_plan_id: i64,

    pub periodicity: i64,
}

/// Partial plan fields for create, update and replace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPatch {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub code: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub name: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benefit_plan_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodicity: Option<i64>,
}

impl PlanPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(Some(code.into()));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Some(name.into()));
        self
    }

    pub fn with_calculation(mut self, calculation: Uuid) -> Self {
        self.calculation = Some(calculation);
        self
    }

    pub fn with_benefit_plan_id(mut self, benefit_plan_id: i64) -> Self {
        self.benefit_plan_id = Some(benefit_plan_id);
        self
    }

    pub fn with_periodicity(mut self, periodicity: i64) -> Self {
        self.periodicity = Some(periodicity);
        self
    }
}

impl EntityData for PlanData {
    type Patch = PlanPatch;

    fn from_patch(patch: &PlanPatch) -> Result<Self, ValidationError> {
        let calculation = patch
            .calculation
            .ok_or_else(|| ValidationError::MissingField("calculation".to_string()))?;
        let benefit_plan_id = patch
            .benefit_plan_id
            .ok_or_else(|| ValidationError::MissingField("benefitPlanId".to_string()))?;
        let periodicity = patch
            .periodicity
            .ok_or_else(|| ValidationError::MissingField("periodicity".to_string()))?;

        if periodicity < 0 {
            return Err(ValidationError::InvalidValue {
                field: "periodicity".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        Ok(Self {
            code: patch.code.clone().flatten(),
            name: patch.name.clone().flatten(),
            calculation,
            benefit_plan_id,
            periodicity,
        })
    }

    fn apply_patch(&mut self, patch: &PlanPatch) -> bool {
        let mut changed = false;
        if let Some(ref code) = patch.code {
            changed |= assign(&mut self.code, code.clone());
        }
        if let Some(ref name) = patch.name {
            changed |= assign(&mut self.name, name.clone());
        }
        if let Some(calculation) = patch.calculation {
            changed |= assign(&mut self.calculation, calculation);
        }
        if let Some(benefit_plan_id) = patch.benefit_plan_id {
            changed |= assign(&mut self.benefit_plan_id, benefit_plan_id);
        }
        if let Some(periodicity) = patch.periodicity {
            changed |= assign(&mut self.periodicity, periodicity);
        }
        changed
    }
}

/// `tblContributionPlan`
pub struct ContributionPlan;

impl Entity for ContributionPlan {
    const KIND: EntityKind = EntityKind::ContributionPlan;
    type Data = PlanData;
}

/// `tblPaymentPlan`
pub struct PaymentPlan;

impl Entity for PaymentPlan {
    const KIND: EntityKind = EntityKind::PaymentPlan;
    type Data = PlanData;
}

pub type ContributionPlanRecord = Record<PlanData>;
pub type PaymentPlanRecord = Record<PlanData>;
