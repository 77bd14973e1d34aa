//! Create, update, delete and replace mutations
//!
//! Every mutation is logged as `Received` before the service runs and then
//! marked with its outcome. Errors are returned in the GraphQL `errors` array
//! with an `extensions.code`.

use async_graphql::{Context, Object};
use serde::Serialize;
use uuid::Uuid;

use super::inputs::{
    BundleDetailsMutationInput, BundleMutationInput, ClientMutation, DeleteInput,
    PlanMutationInput,
};
use super::types::MutationPayload;
use super::{caller, state, to_gql_error};
use crate::models::{
    ContributionPlan, ContributionPlanBundle, ContributionPlanBundleDetails, Entity, EntityInput,
    MutationLogEntry, PaymentPlan, PlanData, ValidationError,
};
use crate::services::{Caller, MutationLogService, PatchOf, PlanServiceError, StoredData};

/// A logged mutation waiting for its outcome
struct LoggedMutation<'a> {
    log: &'a MutationLogService,
    entry: MutationLogEntry,
}

impl<'a> LoggedMutation<'a> {
    async fn begin(
        log: &'a MutationLogService,
        caller: &Caller,
        name: &str,
        payload: &impl Serialize,
        client: ClientMutation,
    ) -> async_graphql::Result<LoggedMutation<'a>> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| async_graphql::Error::new(format!("Invalid mutation payload: {}", e)))?;
        let entry = log
            .begin(caller, name, payload, client.id, client.label)
            .await
            .map_err(to_gql_error)?;
        Ok(Self { log, entry })
    }

    fn id(&self) -> Uuid {
        self.entry.id
    }

    /// Record the outcome and answer with the service result
    ///
    /// The service has already committed by now, so a failed status update is
    /// only logged.
    async fn finish<T>(
        self,
        outcome: Result<T, PlanServiceError>,
    ) -> async_graphql::Result<MutationPayload> {
        if let Err(e) = self.log.complete(&self.entry, &outcome).await {
            tracing::warn!(
                mutation = %self.entry.id,
                "Failed to record outcome of {}: {}",
                self.entry.mutation_name,
                e
            );
        }
        outcome.map_err(to_gql_error)?;
        Ok(MutationPayload {
            internal_id: self.entry.id,
            client_mutation_id: self.entry.client_mutation_id,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Create,
    Update,
    Replace,
}

/// Log and run a create, update or replace of `E`
///
/// Input that fails to convert is rejected before anything is logged.
async fn write<E>(
    ctx: &Context<'_>,
    name: &str,
    change: Change,
    client: ClientMutation,
    input: Result<EntityInput<PatchOf<E>>, ValidationError>,
) -> async_graphql::Result<MutationPayload>
where
    E: Entity,
    E::Data: StoredData,
{
    let (state, caller) = (state(ctx)?, caller(ctx));
    let input = input.map_err(to_gql_error)?;
    let logged = LoggedMutation::begin(&state.mutation_log, &caller, name, &input, client).await?;
    let mutation_id = Some(logged.id());

    let service = &state.service;
    let outcome = match change {
        Change::Create => service.create::<E>(&caller, input, mutation_id).await.map(|_| ()),
        Change::Update => service.update::<E>(&caller, input, mutation_id).await.map(|_| ()),
        Change::Replace => service.replace::<E>(&caller, input, mutation_id).await.map(|_| ()),
    };
    logged.finish(outcome).await
}

async fn write_plan<E>(
    ctx: &Context<'_>,
    name: &str,
    change: Change,
    input: PlanMutationInput,
) -> async_graphql::Result<MutationPayload>
where
    E: Entity<Data = PlanData>,
{
    let client = input.client_mutation();
    let input = input.into_entity_input(E::KIND);
    write::<E>(ctx, name, change, client, input).await
}

async fn delete<E>(
    ctx: &Context<'_>,
    name: &str,
    input: DeleteInput,
) -> async_graphql::Result<MutationPayload>
where
    E: Entity,
    E::Data: StoredData,
{
    let (state, caller) = (state(ctx)?, caller(ctx));
    let ids = input.parse_ids(E::KIND).map_err(to_gql_error)?;
    let logged = LoggedMutation::begin(
        &state.mutation_log,
        &caller,
        name,
        &serde_json::json!({ "uuids": ids }),
        input.client_mutation(),
    )
    .await?;
    let outcome = state.service.delete::<E>(&caller, &ids, Some(logged.id())).await;
    logged.finish(outcome).await
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_contribution_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<ContributionPlan>(ctx, "createContributionPlan", Change::Create, input).await
    }

    async fn update_contribution_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<ContributionPlan>(ctx, "updateContributionPlan", Change::Update, input).await
    }

    async fn delete_contribution_plan(
        &self,
        ctx: &Context<'_>,
        input: DeleteInput,
    ) -> async_graphql::Result<MutationPayload> {
        delete::<ContributionPlan>(ctx, "deleteContributionPlan", input).await
    }

    async fn replace_contribution_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<ContributionPlan>(ctx, "replaceContributionPlan", Change::Replace, input).await
    }

    async fn create_payment_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<PaymentPlan>(ctx, "createPaymentPlan", Change::Create, input).await
    }

    async fn update_payment_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<PaymentPlan>(ctx, "updatePaymentPlan", Change::Update, input).await
    }

    async fn delete_payment_plan(
        &self,
        ctx: &Context<'_>,
        input: DeleteInput,
    ) -> async_graphql::Result<MutationPayload> {
        delete::<PaymentPlan>(ctx, "deletePaymentPlan", input).await
    }

    async fn replace_payment_plan(
        &self,
        ctx: &Context<'_>,
        input: PlanMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        write_plan::<PaymentPlan>(ctx, "replacePaymentPlan", Change::Replace, input).await
    }

    async fn create_contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
        input: BundleMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundle>(
            ctx,
            "createContributionPlanBundle",
            Change::Create,
            client,
            input.into_entity_input(),
        )
        .await
    }

    async fn update_contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
        input: BundleMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundle>(
            ctx,
            "updateContributionPlanBundle",
            Change::Update,
            client,
            input.into_entity_input(),
        )
        .await
    }

    async fn delete_contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
        input: DeleteInput,
    ) -> async_graphql::Result<MutationPayload> {
        delete::<ContributionPlanBundle>(ctx, "deleteContributionPlanBundle", input).await
    }

    async fn replace_contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
        input: BundleMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundle>(
            ctx,
            "replaceContributionPlanBundle",
            Change::Replace,
            client,
            input.into_entity_input(),
        )
        .await
    }

    async fn create_contribution_plan_bundle_details(
        &self,
        ctx: &Context<'_>,
        input: BundleDetailsMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundleDetails>(
            ctx,
            "createContributionPlanBundleDetails",
            Change::Create,
            client,
            input.into_entity_input(),
        )
        .await
    }

    async fn update_contribution_plan_bundle_details(
        &self,
        ctx: &Context<'_>,
        input: BundleDetailsMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundleDetails>(
            ctx,
            "updateContributionPlanBundleDetails",
            Change::Update,
            client,
            input.into_entity_input(),
        )
        .await
    }

    async fn delete_contribution_plan_bundle_details(
        &self,
        ctx: &Context<'_>,
        input: DeleteInput,
    ) -> async_graphql::Result<MutationPayload> {
        delete::<ContributionPlanBundleDetails>(ctx, "deleteContributionPlanBundleDetails", input)
            .await
    }

    async fn replace_contribution_plan_bundle_details(
        &self,
        ctx: &Context<'_>,
        input: BundleDetailsMutationInput,
    ) -> async_graphql::Result<MutationPayload> {
        let client = input.client_mutation();
        write::<ContributionPlanBundleDetails>(
            ctx,
            "replaceContributionPlanBundleDetails",
            Change::Replace,
            client,
            input.into_entity_input(),
        )
        .await
    }
}
