//! GraphQL Surface
//!
//! Thin `async-graphql` layer over [`PlanService`]: four paginated
//! connections with `totalCount` and sixteen mutations that go through the
//! mutation log. The request's [`Caller`] is supplied as request data by the
//! transport; requests without one run as anonymous.
//!
//! ```no_run
//! # use contribution_plan_core::graphql::build_schema;
//! # use contribution_plan_core::services::{Caller, MutationLogService, PlanService};
//! # async fn run(service: std::sync::Arc<PlanService>, log: MutationLogService) {
//! let schema = build_schema(service, log);
//! let request = async_graphql::Request::new("{ contributionPlan { totalCount } }")
//!     .data(Caller::anonymous());
//! let response = schema.execute(request).await;
//! # }
//! ```

pub mod global_id;
pub mod inputs;
mod mutation;
mod query;
pub mod types;

use async_graphql::{Context, EmptySubscription, ErrorExtensions, Schema};
use std::sync::Arc;

use crate::services::{Caller, MutationLogService, PlanService, PlanServiceError};

pub use mutation::MutationRoot;
pub use query::QueryRoot;

pub type PlanSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Services shared by every resolver
#[derive(Clone)]
pub struct GraphQLState {
    pub service: Arc<PlanService>,
    pub mutation_log: MutationLogService,
}

pub fn build_schema(service: Arc<PlanService>, mutation_log: MutationLogService) -> PlanSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(GraphQLState {
            service,
            mutation_log,
        })
        .finish()
}

pub(crate) fn state<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a GraphQLState> {
    ctx.data::<GraphQLState>()
}

pub(crate) fn service<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a PlanService> {
    Ok(state(ctx)?.service.as_ref())
}

pub(crate) fn caller(ctx: &Context<'_>) -> Caller {
    ctx.data_opt::<Caller>().cloned().unwrap_or_default()
}

/// Convert a service error into a GraphQL error with `extensions.code`
pub(crate) fn to_gql_error(err: impl Into<PlanServiceError>) -> async_graphql::Error {
    let err = err.into();
    let code = err.code();
    async_graphql::Error::new(err.to_string()).extend_with(|_, e| e.set("code", code))
}
