//! GraphQL output types

use async_graphql::{ComplexObject, Context, SimpleObject, ID};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{caller, global_id, service, to_gql_error};
use crate::models::{
    BundleData, BundleDetailsData, BundleDetailsRecord, BundleRecord, BusinessMeta,
    ContributionPlan, ContributionPlanBundle, ContributionPlanRecord, EntityKind,
    PaymentPlanRecord,
};

/// Columns every versioned entity exposes
#[derive(SimpleObject, Clone, Debug)]
pub struct BusinessFields {
    /// Relay global id
    pub id: ID,
    pub uuid: Uuid,
    pub version: i64,
    pub is_deleted: bool,
    pub date_valid_from: DateTime<Utc>,
    pub date_valid_to: Option<DateTime<Utc>>,
    pub replacement_uuid: Option<Uuid>,
    /// JSON-encoded extension bag
    pub json_ext: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub user_created: Uuid,
    pub user_updated: Uuid,
}

impl BusinessFields {
    fn new(kind: EntityKind, meta: &BusinessMeta) -> Self {
        Self {
            id: ID(global_id::encode(kind, meta.id)),
            uuid: meta.id,
            version: meta.version,
            is_deleted: meta.is_deleted,
            date_valid_from: meta.date_valid_from,
            date_valid_to: meta.date_valid_to,
            replacement_uuid: meta.replacement_uuid,
            json_ext: meta.json_ext.as_ref().map(|v| v.to_string()),
            date_created: meta.date_created,
            date_updated: meta.date_updated,
            user_created: meta.user_created,
            user_updated: meta.user_updated,
        }
    }
}

#[derive(SimpleObject, Clone, Debug)]
#[graphql(name = "ContributionPlanGQLType", complex)]
pub struct ContributionPlanNode {
    #[graphql(flatten)]
    pub business: BusinessFields,
    pub code: Option<String>,
    pub name: Option<String>,
    pub calculation: Uuid,
    pub benefit_plan_id: i64,
    pub periodicity: i64,
    #[graphql(skip)]
    pub record: ContributionPlanRecord,
}

#[ComplexObject]
impl ContributionPlanNode {
    /// Periodicity, adjusted by any registered contribution-length hook
    async fn contribution_length(&self, ctx: &Context<'_>) -> async_graphql::Result<i64> {
        Ok(service(ctx)?.contribution_length(&self.record))
    }
}

impl From<ContributionPlanRecord> for ContributionPlanNode {
    fn from(record: ContributionPlanRecord) -> Self {
        Self {
            business: BusinessFields::new(EntityKind::ContributionPlan, &record.meta),
            code: record.data.code.clone(),
            name: record.data.name.clone(),
            calculation: record.data.calculation,
            benefit_plan_id: record.data.benefit_plan_id,
            periodicity: record.data.periodicity,
            record,
        }
    }
}

#[derive(SimpleObject, Clone, Debug)]
#[graphql(name = "PaymentPlanGQLType")]
pub struct PaymentPlanNode {
    #[graphql(flatten)]
    pub business: BusinessFields,
    pub code: Option<String>,
    pub name: Option<String>,
    pub calculation: Uuid,
    pub benefit_plan_id: i64,
    pub periodicity: i64,
}

impl From<PaymentPlanRecord> for PaymentPlanNode {
    fn from(record: PaymentPlanRecord) -> Self {
        Self {
            business: BusinessFields::new(EntityKind::PaymentPlan, &record.meta),
            code: record.data.code,
            name: record.data.name,
            calculation: record.data.calculation,
            benefit_plan_id: record.data.benefit_plan_id,
            periodicity: record.data.periodicity,
        }
    }
}

#[derive(SimpleObject, Clone, Debug)]
#[graphql(name = "ContributionPlanBundleGQLType")]
pub struct ContributionPlanBundleNode {
    #[graphql(flatten)]
    pub business: BusinessFields,
    pub code: String,
    pub name: Option<String>,
    pub periodicity: Option<i64>,
}

impl From<BundleRecord> for ContributionPlanBundleNode {
    fn from(record: BundleRecord) -> Self {
        let BundleData {
            code,
            name,
            periodicity,
        } = record.data;
        Self {
            business: BusinessFields::new(EntityKind::ContributionPlanBundle, &record.meta),
            code,
            name,
            periodicity,
        }
    }
}

#[derive(SimpleObject, Clone, Debug)]
#[graphql(name = "ContributionPlanBundleDetailsGQLType", complex)]
pub struct ContributionPlanBundleDetailsNode {
    #[graphql(flatten)]
    pub business: BusinessFields,
    pub contribution_plan_bundle_id: Uuid,
    pub contribution_plan_id: Uuid,
}

#[ComplexObject]
impl ContributionPlanBundleDetailsNode {
    async fn contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Option<ContributionPlanBundleNode>> {
        let record = service(ctx)?
            .get::<ContributionPlanBundle>(&caller(ctx), self.contribution_plan_bundle_id)
            .await
            .map_err(to_gql_error)?;
        Ok(record.map(Into::into))
    }

    async fn contribution_plan(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Option<ContributionPlanNode>> {
        let record = service(ctx)?
            .get::<ContributionPlan>(&caller(ctx), self.contribution_plan_id)
            .await
            .map_err(to_gql_error)?;
        Ok(record.map(Into::into))
    }
}

impl From<BundleDetailsRecord> for ContributionPlanBundleDetailsNode {
    fn from(record: BundleDetailsRecord) -> Self {
        let BundleDetailsData {
            contribution_plan_bundle_id,
            contribution_plan_id,
        } = record.data;
        Self {
            business: BusinessFields::new(EntityKind::ContributionPlanBundleDetails, &record.meta),
            contribution_plan_bundle_id,
            contribution_plan_id,
        }
    }
}

/// Extra connection field carrying the unpaginated match count
#[derive(SimpleObject, Clone, Copy, Debug)]
pub struct TotalCount {
    pub total_count: i64,
}

#[derive(SimpleObject, Clone, Debug)]
pub struct MutationPayload {
    /// Mutation log id
    pub internal_id: Uuid,
    pub client_mutation_id: Option<String>,
}
