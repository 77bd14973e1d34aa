//! GraphQL and health endpoints
//!
//! - `POST /graphql` - execute a GraphQL request as the header-identified caller
//! - `GET /graphql` - GraphiQL page
//! - `GET /api/health` - health check

use async_graphql::http::GraphiQLSource;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{Html, Json},
    routing::get,
    Router,
};
use serde::Serialize;

use crate::caller::caller_from_headers;
use crate::{AppState, HttpError};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Result<Json<async_graphql::Response>, HttpError> {
    let caller = caller_from_headers(&headers)?;
    tracing::debug!(
        user = ?caller.user_id,
        operation = ?request.operation_name,
        "Executing GraphQL request"
    );

    let response = state.schema.execute(request.data(caller)).await;
    Ok(Json(response))
}

async fn graphiql() -> Html<String> {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/graphql", get(graphiql).post(graphql_handler))
        .with_state(state)
}
