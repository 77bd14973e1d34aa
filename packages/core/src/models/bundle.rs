//! Contribution Plan Bundles and their membership rows

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::business::{assign, deserialize_optional_field, Entity, EntityData, EntityKind, Record};
use super::ValidationError;

/// Entity data of `tblContributionPlanBundle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleData {
    pub code: String,
    pub name: Option<String>,
    pub periodicity: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub name: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub periodicity: Option<Option<i64>>,
}

impl BundlePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Some(name.into()));
        self
    }

    pub fn with_periodicity(mut self, periodicity: i64) -> Self {
        self.periodicity = Some(Some(periodicity));
        self
    }
}

impl EntityData for BundleData {
    type Patch = BundlePatch;

    fn from_patch(patch: &BundlePatch) -> Result<Self, ValidationError> {
        let code = match patch.code {
            Some(ref code) if !code.trim().is_empty() => code.clone(),
            _ => return Err(ValidationError::MissingField("code".to_string())),
        };

        Ok(Self {
            code,
            name: patch.name.clone().flatten(),
            periodicity: patch.periodicity.flatten(),
        })
    }

    fn apply_patch(&mut self, patch: &BundlePatch) -> bool {
        let mut changed = false;
        if let Some(ref code) = patch.code {
            changed |= assign(&mut self.code, code.clone());
        }
        if let Some(ref name) = patch.name {
            changed |= assign(&mut self.name, name.clone());
        }
        if let Some(periodicity) = patch.periodicity {
            changed |= assign(&mut self.periodicity, periodicity);
        }
        changed
    }
}

/// `tblContributionPlanBundle`
pub struct ContributionPlanBundle;

impl Entity for ContributionPlanBundle {
    const KIND: EntityKind = EntityKind::ContributionPlanBundle;
    type Data = BundleData;
}

/// Entity data of `tblContributionPlanBundleDetails`: one plan inside one bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDetailsData {
    pub contribution_plan_bundle_id: Uuid,
    pub contribution_plan_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDetailsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_plan_bundle_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_plan_id: Option<Uuid>,
}

impl BundleDetailsPatch {
    pub fn new(contribution_plan_bundle_id: Uuid, contribution_plan_id: Uuid) -> Self {
        Self {
            contribution_plan_bundle_id: Some(contribution_plan_bundle_id),
            contribution_plan_id: Some(contribution_plan_id),
        }
    }
}

impl EntityData for BundleDetailsData {
    type Patch = BundleDetailsPatch;

    fn from_patch(patch: &BundleDetailsPatch) -> Result<Self, ValidationError> {
        Ok(Self {
            contribution_plan_bundle_id: patch.contribution_plan_bundle_id.ok_or_else(|| {
                ValidationError::MissingField("contributionPlanBundleId".to_string())
            })?,
            contribution_plan_id: patch
                .contribution_plan_id
                .ok_or_else(|| ValidationError::MissingField("contributionPlanId".to_string()))?,
        })
    }

    fn apply_patch(&mut self, patch: &BundleDetailsPatch) -> bool {
        let mut changed = false;
        if let Some(bundle_id) = patch.contribution_plan_bundle_id {
            changed |= assign(&mut self.contribution_plan_bundle_id, bundle_id);
        }
        if let Some(plan_id) = patch.contribution_plan_id {
            changed |= assign(&mut self.contribution_plan_id, plan_id);
        }
        changed
    }
}

/// `tblContributionPlanBundleDetails`
pub struct ContributionPlanBundleDetails;

impl Entity for ContributionPlanBundleDetails {
    const KIND: EntityKind = EntityKind::ContributionPlanBundleDetails;
    type Data = BundleDetailsData;
}

pub type BundleRecord = Record<BundleData>;
pub type BundleDetailsRecord = Record<BundleDetailsData>;
