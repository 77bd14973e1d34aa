//! Connection queries for the four entity kinds

use async_graphql::connection::{Connection, CursorType, Edge};
use async_graphql::{Context, Object, OutputType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::global_id::parse_id;
use super::types::{
    ContributionPlanBundleDetailsNode, ContributionPlanBundleNode, ContributionPlanNode,
    PaymentPlanNode, TotalCount,
};
use super::{caller, service, to_gql_error};
use crate::models::{
    ContributionPlan, ContributionPlanBundle, ContributionPlanBundleDetails, Entity, EntityFilter,
    EntityKind, FieldFilter, FilterOperator, OrderBy, PaymentPlan, Record,
};
use crate::services::StoredData;

type PlanConnection<N> = Connection<usize, N, TotalCount>;

/// Arguments every entity connection accepts
struct CommonArgs {
    id: Option<String>,
    version: Option<i64>,
    is_deleted: Option<bool>,
    date_valid_from_gte: Option<DateTime<Utc>>,
    date_valid_to_lte: Option<DateTime<Utc>>,
    apply_default_validity_filter: Option<bool>,
    order_by: Option<Vec<String>>,
    first: Option<i32>,
    after: Option<String>,
    offset: Option<i32>,
}

/// Exact, `Icontains` and `Istartswith` variants of a text argument
struct TextArgs {
    exact: Option<String>,
    icontains: Option<String>,
    istartswith: Option<String>,
}

fn non_negative(name: &str, value: Option<i32>) -> async_graphql::Result<Option<usize>> {
    value
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                async_graphql::Error::new(format!("{} must not be negative", name))
            })
        })
        .transpose()
}

fn push<V: Into<serde_json::Value>>(
    filter: &mut EntityFilter,
    field: &str,
    operator: FilterOperator,
    value: Option<V>,
) {
    if let Some(value) = value {
        filter
            .field_filters
            .push(FieldFilter::new(field, operator, value));
    }
}

fn push_text(filter: &mut EntityFilter, field: &str, args: TextArgs) {
    push(filter, field, FilterOperator::Equals, args.exact);
    push(filter, field, FilterOperator::IContains, args.icontains);
    push(filter, field, FilterOperator::IStartsWith, args.istartswith);
}

fn base_filter(kind: EntityKind, args: CommonArgs) -> async_graphql::Result<EntityFilter> {
    let mut filter = EntityFilter::new();

    if let Some(id) = args.id {
        let id = parse_id(&id, kind).map_err(to_gql_error)?;
        push(&mut filter, "id", FilterOperator::Equals, Some(id.to_string()));
    }
    push(&mut filter, "version", FilterOperator::Equals, args.version);

    filter.is_deleted = args.is_deleted;
    filter.date_valid_from_gte = args.date_valid_from_gte;
    filter.date_valid_to_lte = args.date_valid_to_lte;
    filter.apply_default_validity_filter = args.apply_default_validity_filter;
    filter.order_by = args
        .order_by
        .unwrap_or_default()
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| OrderBy::parse(raw))
        .collect();

    let after = args
        .after
        .map(|cursor| {
            let position = usize::decode_cursor(&cursor)
                .map_err(|e| async_graphql::Error::new(format!("Invalid cursor: {}", e)))?;
            position
                .checked_add(1)
                .ok_or_else(|| async_graphql::Error::new("Invalid cursor: position out of range"))
        })
        .transpose()?;
    let offset = non_negative("offset", args.offset)?;
    filter.offset = match (after, offset) {
        (None, None) => None,
        (after, offset) => {
            let start = after
                .unwrap_or(0)
                .checked_add(offset.unwrap_or(0))
                .filter(|start| i64::try_from(*start).is_ok())
                .ok_or_else(|| async_graphql::Error::new("Invalid cursor: position out of range"))?;
            Some(start)
        }
    };
    filter.limit = non_negative("first", args.first)?;

    Ok(filter)
}

async fn resolve_connection<E, N>(
    ctx: &Context<'_>,
    filter: EntityFilter,
) -> async_graphql::Result<PlanConnection<N>>
where
    E: Entity,
    E::Data: StoredData,
    N: OutputType + From<Record<E::Data>>,
{
    let page = service(ctx)?
        .query::<E>(&caller(ctx), filter)
        .await
        .map_err(to_gql_error)?;

    let start = page.offset;
    let mut connection = Connection::with_additional_fields(
        start > 0,
        page.has_next_page(),
        TotalCount {
            total_count: page.total_count,
        },
    );
    connection.edges.extend(
        page.items
            .into_iter()
            .enumerate()
            .map(|(i, record)| Edge::new(start + i, N::from(record))),
    );
    Ok(connection)
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    #[allow(clippy::too_many_arguments)]
    async fn contribution_plan(
        &self,
        ctx: &Context<'_>,
        id: Option<String>,
        version: Option<i64>,
        is_deleted: Option<bool>,
        #[graphql(name = "dateValidFrom_Gte")] date_valid_from_gte: Option<DateTime<Utc>>,
        #[graphql(name = "dateValidTo_Lte")] date_valid_to_lte: Option<DateTime<Utc>>,
        apply_default_validity_filter: Option<bool>,
        code: Option<String>,
        #[graphql(name = "code_Icontains")] code_icontains: Option<String>,
        #[graphql(name = "code_Istartswith")] code_istartswith: Option<String>,
        name: Option<String>,
        #[graphql(name = "name_Icontains")] name_icontains: Option<String>,
        #[graphql(name = "name_Istartswith")] name_istartswith: Option<String>,
        periodicity: Option<i64>,
        #[graphql(name = "periodicity_Gte")] periodicity_gte: Option<i64>,
        #[graphql(name = "periodicity_Lte")] periodicity_lte: Option<i64>,
        calculation: Option<Uuid>,
        benefit_plan_id: Option<i64>,
        order_by: Option<Vec<String>>,
        first: Option<i32>,
        after: Option<String>,
        offset: Option<i32>,
    ) -> async_graphql::Result<PlanConnection<ContributionPlanNode>> {
        let mut filter = base_filter(
            EntityKind::ContributionPlan,
            CommonArgs {
                id,
                version,
                is_deleted,
                date_valid_from_gte,
                date_valid_to_lte,
                apply_default_validity_filter,
                order_by,
                first,
                after,
                offset,
            },
        )?;
        push_text(
            &mut filter,
            "code",
            TextArgs {
                exact: code,
                icontains: code_icontains,
                istartswith: code_istartswith,
            },
        );
        push_text(
            &mut filter,
            "name",
            TextArgs {
                exact: name,
                icontains: name_icontains,
                istartswith: name_istartswith,
            },
        );
        push(&mut filter, "periodicity", FilterOperator::Equals, periodicity);
        push(&mut filter, "periodicity", FilterOperator::GreaterThanOrEqual, periodicity_gte);
        push(&mut filter, "periodicity", FilterOperator::LessThanOrEqual, periodicity_lte);
        push(&mut filter, "calculation", FilterOperator::Equals, calculation.map(|c| c.to_string()));
        push(&mut filter, "benefit_plan_id", FilterOperator::Equals, benefit_plan_id);

        resolve_connection::<ContributionPlan, _>(ctx, filter).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn payment_plan(
        &self,
        ctx: &Context<'_>,
        id: Option<String>,
        version: Option<i64>,
        is_deleted: Option<bool>,
        #[graphql(name = "dateValidFrom_Gte")] date_valid_from_gte: Option<DateTime<Utc>>,
        #[graphql(name = "dateValidTo_Lte")] date_valid_to_lte: Option<DateTime<Utc>>,
        apply_default_validity_filter: Option<bool>,
        code: Option<String>,
        #[graphql(name = "code_Icontains")] code_icontains: Option<String>,
        #[graphql(name = "code_Istartswith")] code_istartswith: Option<String>,
        name: Option<String>,
        #[graphql(name = "name_Icontains")] name_icontains: Option<String>,
        #[graphql(name = "name_Istartswith")] name_istartswith: Option<String>,
        periodicity: Option<i64>,
        #[graphql(name = "periodicity_Gte")] periodicity_gte: Option<i64>,
        #[graphql(name = "periodicity_Lte")] periodicity_lte: Option<i64>,
        calculation: Option<Uuid>,
        benefit_plan_id: Option<i64>,
        order_by: Option<Vec<String>>,
        first: Option<i32>,
        after: Option<String>,
        offset: Option<i32>,
    ) -> async_graphql::Result<PlanConnection<PaymentPlanNode>> {
        let mut filter = base_filter(
            EntityKind::PaymentPlan,
            CommonArgs {
                id,
                version,
                is_deleted,
                date_valid_from_gte,
                date_valid_to_lte,
                apply_default_validity_filter,
                order_by,
                first,
                after,
                offset,
            },
        )?;
        push_text(
            &mut filter,
            "code",
            TextArgs {
                exact: code,
                icontains: code_icontains,
                istartswith: code_istartswith,
            },
        );
        push_text(
            &mut filter,
            "name",
            TextArgs {
                exact: name,
                icontains: name_icontains,
                istartswith: name_istartswith,
            },
        );
        push(&mut filter, "periodicity", FilterOperator::Equals, periodicity);
        push(&mut filter, "periodicity", FilterOperator::GreaterThanOrEqual, periodicity_gte);
        push(&mut filter, "periodicity", FilterOperator::LessThanOrEqual, periodicity_lte);
        push(&mut filter, "calculation", FilterOperator::Equals, calculation.map(|c| c.to_string()));
        push(&mut filter, "benefit_plan_id", FilterOperator::Equals, benefit_plan_id);

        resolve_connection::<PaymentPlan, _>(ctx, filter).await
    }

    /// Bundles; `calculation` and `insuranceProduct` match through the
    /// bundle's member plans and return each bundle once
    #[allow(clippy::too_many_arguments)]
    async fn contribution_plan_bundle(
        &self,
        ctx: &Context<'_>,
        id: Option<String>,
        version: Option<i64>,
        is_deleted: Option<bool>,
        #[graphql(name = "dateValidFrom_Gte")] date_valid_from_gte: Option<DateTime<Utc>>,
        #[graphql(name = "dateValidTo_Lte")] date_valid_to_lte: Option<DateTime<Utc>>,
        apply_default_validity_filter: Option<bool>,
        code: Option<String>,
        #[graphql(name = "code_Icontains")] code_icontains: Option<String>,
        #[graphql(name = "code_Istartswith")] code_istartswith: Option<String>,
        name: Option<String>,
        #[graphql(name = "name_Icontains")] name_icontains: Option<String>,
        #[graphql(name = "name_Istartswith")] name_istartswith: Option<String>,
        periodicity: Option<i64>,
        calculation: Option<Uuid>,
        insurance_product: Option<i64>,
        order_by: Option<Vec<String>>,
        first: Option<i32>,
        after: Option<String>,
        offset: Option<i32>,
    ) -> async_graphql::Result<PlanConnection<ContributionPlanBundleNode>> {
        let mut filter = base_filter(
            EntityKind::ContributionPlanBundle,
            CommonArgs {
                id,
                version,
                is_deleted,
                date_valid_from_gte,
                date_valid_to_lte,
                apply_default_validity_filter,
                order_by,
                first,
                after,
                offset,
            },
        )?;
        push_text(
            &mut filter,
            "code",
            TextArgs {
                exact: code,
                icontains: code_icontains,
                istartswith: code_istartswith,
            },
        );
        push_text(
            &mut filter,
            "name",
            TextArgs {
                exact: name,
                icontains: name_icontains,
                istartswith: name_istartswith,
            },
        );
        push(&mut filter, "periodicity", FilterOperator::Equals, periodicity);
        filter.calculation = calculation;
        filter.insurance_product = insurance_product;

        resolve_connection::<ContributionPlanBundle, _>(ctx, filter).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn contribution_plan_bundle_details(
        &self,
        ctx: &Context<'_>,
        id: Option<String>,
        version: Option<i64>,
        is_deleted: Option<bool>,
        #[graphql(name = "dateValidFrom_Gte")] date_valid_from_gte: Option<DateTime<Utc>>,
        #[graphql(name = "dateValidTo_Lte")] date_valid_to_lte: Option<DateTime<Utc>>,
        apply_default_validity_filter: Option<bool>,
        contribution_plan_bundle_id: Option<String>,
        contribution_plan_id: Option<String>,
        order_by: Option<Vec<String>>,
        first: Option<i32>,
        after: Option<String>,
        offset: Option<i32>,
    ) -> async_graphql::Result<PlanConnection<ContributionPlanBundleDetailsNode>> {
        let mut filter = base_filter(
            EntityKind::ContributionPlanBundleDetails,
            CommonArgs {
                id,
                version,
                is_deleted,
                date_valid_from_gte,
                date_valid_to_lte,
                apply_default_validity_filter,
                order_by,
                first,
                after,
                offset,
            },
        )?;
        if let Some(bundle) = contribution_plan_bundle_id {
            let bundle =
                parse_id(&bundle, EntityKind::ContributionPlanBundle).map_err(to_gql_error)?;
            push(
                &mut filter,
                "contribution_plan_bundle_id",
                FilterOperator::Equals,
                Some(bundle.to_string()),
            );
        }
        if let Some(plan) = contribution_plan_id {
            let plan = parse_id(&plan, EntityKind::ContributionPlan).map_err(to_gql_error)?;
            push(
                &mut filter,
                "contribution_plan_id",
                FilterOperator::Equals,
                Some(plan.to_string()),
            );
        }

        resolve_connection::<ContributionPlanBundleDetails, _>(ctx, filter).await
    }
}
