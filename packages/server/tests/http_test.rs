//! HTTP Endpoint Tests
//!
//! Drives the axum router with `tower::ServiceExt::oneshot`, so no socket is
//! bound.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use contribution_plan_core::PlanConfig;
use contribution_plan_server::caller::{PERMISSIONS_HEADER, SUPERUSER_HEADER, USER_ID_HEADER};
use contribution_plan_server::{cors_layer, create_router, AppState, ServerConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

struct TestServer {
    router: Router,
    product_id: i64,
    _temp_dir: TempDir,
}

async fn setup() -> Result<TestServer> {
    let temp_dir = TempDir::new()?;
    let config = PlanConfig {
        database_path: Some(temp_dir.path().join("server.db")),
        ..PlanConfig::default()
    };
    let state = AppState::from_config(config).await?;
    let product = state
        .db
        .db_insert_product("BP", "Benefit plan", Some(12))
        .await?;

    Ok(TestServer {
        router: create_router(state, cors_layer(None)?),
        product_id: product.id,
        _temp_dir: temp_dir,
    })
}

fn graphql_request(query: &str, headers: &[(&str, &str)]) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    Ok(builder.body(Body::from(serde_json::to_vec(&json!({ "query": query }))?))?)
}

async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Vec<u8>)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes().to_vec();
    Ok((status, body))
}

async fn send_json(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let (status, body) = send(router, request).await?;
    Ok((status, serde_json::from_slice(&body)?))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let server = setup().await?;
    let request = Request::builder().uri("/api/health").body(Body::empty())?;

    let (status, body) = send_json(&server.router, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_graphiql_page_served_on_get() -> Result<()> {
    let server = setup().await?;
    let request = Request::builder().uri("/graphql").body(Body::empty())?;

    let (status, body) = send(&server.router, request).await?;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body)?;
    assert!(html.contains("/graphql"));
    Ok(())
}

#[tokio::test]
async fn test_anonymous_query_is_denied() -> Result<()> {
    let server = setup().await?;
    let request = graphql_request("{ contributionPlan { totalCount } }", &[])?;

    let (status, body) = send_json(&server.router, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["extensions"]["code"], "PERMISSION_DENIED");
    Ok(())
}

#[tokio::test]
async fn test_superuser_creates_and_queries_plan() -> Result<()> {
    let server = setup().await?;
    let user = Uuid::new_v4().to_string();
    let headers = [(USER_ID_HEADER, user.as_str()), (SUPERUSER_HEADER, "true")];

    let create = format!(
        r#"mutation {{
            createContributionPlan(input: {{
                clientMutationId: "http-1"
                code: "HTTP"
                name: "Over the wire"
                calculation: "{}"
                benefitPlanId: {}
                periodicity: 6
            }}) {{ internalId clientMutationId }}
        }}"#,
        Uuid::new_v4(),
        server.product_id
    );
    let (status, created) = send_json(&server.router, graphql_request(&create, &headers)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(created.get("errors").is_none(), "{}", created);
    assert_eq!(created["data"]["createContributionPlan"]["clientMutationId"], "http-1");

    let query = r#"{ contributionPlan(code: "HTTP") { totalCount edges { node { code periodicity } } } }"#;
    let (_, listed) = send_json(&server.router, graphql_request(query, &headers)?).await?;
    assert_eq!(listed["data"]["contributionPlan"]["totalCount"], 1);
    assert_eq!(listed["data"]["contributionPlan"]["edges"][0]["node"]["periodicity"], 6);
    Ok(())
}

#[tokio::test]
async fn test_permission_header_grants_query_only() -> Result<()> {
    let server = setup().await?;
    let user = Uuid::new_v4().to_string();
    let headers = [(USER_ID_HEADER, user.as_str()), (PERMISSIONS_HEADER, "151201")];

    let (_, listed) = send_json(
        &server.router,
        graphql_request("{ contributionPlan { totalCount } }", &headers)?,
    )
    .await?;
    assert!(listed.get("errors").is_none(), "{}", listed);
    assert_eq!(listed["data"]["contributionPlan"]["totalCount"], 0);

    let delete = r#"mutation { deleteContributionPlan(input: { uuids: [] }) { internalId } }"#;
    let (_, denied) = send_json(&server.router, graphql_request(delete, &headers)?).await?;
    assert_eq!(denied["errors"][0]["extensions"]["code"], "PERMISSION_DENIED");
    Ok(())
}

#[tokio::test]
async fn test_invalid_user_header_is_bad_request() -> Result<()> {
    let server = setup().await?;
    let request = graphql_request(
        "{ contributionPlan { totalCount } }",
        &[(USER_ID_HEADER, "not-a-uuid")],
    )?;

    let (status, body) = send_json(&server.router, request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    Ok(())
}

#[test]
fn test_server_config_defaults() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 3001);
    assert!(config.cors_allow_origin.is_none());
    assert!(cors_layer(Some("http://localhost:5173")).is_ok());
}
