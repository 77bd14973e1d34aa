//! GraphQL Schema Tests
//!
//! End-to-end tests that run queries and mutations through the async-graphql
//! schema against a temporary database.

#[cfg(test)]
mod graphql_tests {
    use anyhow::Result;
    use async_graphql::connection::CursorType;
    use async_graphql::Request;
    use contribution_plan_core::db::DatabaseService;
    use contribution_plan_core::graphql::{build_schema, PlanSchema};
    use contribution_plan_core::services::security::{PLAN_CREATE, PLAN_QUERY};
    use contribution_plan_core::services::{
        Caller, MutationLinker, MutationLogService, PlanService,
    };
    use contribution_plan_core::{MutationStatus, PlanConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        schema: PlanSchema,
        log: MutationLogService,
        product_id: i64,
        admin: Caller,
        _temp_dir: TempDir,
    }

    async fn setup() -> Result<Fixture> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("test.db")).await?);
        let product = db.db_insert_product("BP", "Benefit plan", Some(12)).await?;
        let service = PlanService::new(db.clone(), PlanConfig::default())
            .with_observer(Arc::new(MutationLinker::new(db.clone())));
        let log = MutationLogService::new(db);

        Ok(Fixture {
            schema: build_schema(Arc::new(service), log.clone()),
            log,
            product_id: product.id,
            admin: Caller::superuser(Uuid::new_v4()),
            _temp_dir: temp_dir,
        })
    }

    /// Run `query` as `caller`, returning `{ "data": ..., "errors": [...] }`
    async fn execute(schema: &PlanSchema, caller: &Caller, query: &str) -> Result<Value> {
        let response = schema
            .execute(Request::new(query).data(caller.clone()))
            .await;
        Ok(json!({
            "errors": serde_json::to_value(&response.errors)?,
            "data": response.data.into_json()?,
        }))
    }

    fn assert_no_errors(response: &Value) {
        assert_eq!(response["errors"], json!([]), "{}", response);
    }

    fn create_plan_mutation(code: &str, product_id: i64, periodicity: i64) -> String {
        format!(
            r#"mutation {{
                createContributionPlan(input: {{
                    clientMutationId: "create-{code}"
                    code: "{code}"
                    name: "Plan {code}"
                    calculation: "{calculation}"
                    benefitPlanId: {product_id}
                    periodicity: {periodicity}
                }}) {{ internalId clientMutationId }}
            }}"#,
            code = code,
            calculation = Uuid::new_v4(),
            product_id = product_id,
            periodicity = periodicity,
        )
    }

    fn error_code(response: &Value) -> Option<&str> {
        response["errors"][0]["extensions"]["code"].as_str()
    }

    #[tokio::test]
    async fn test_create_then_query_by_code() -> Result<()> {
        let fx = setup().await?;

        let created = execute(
            &fx.schema,
            &fx.admin,
            &create_plan_mutation("XYZ", fx.product_id, 12),
        )
        .await?;
        assert_no_errors(&created);
        assert_eq!(
            created["data"]["createContributionPlan"]["clientMutationId"],
            "create-XYZ"
        );

        let internal_id: Uuid = created["data"]["createContributionPlan"]["internalId"]
            .as_str()
            .unwrap()
            .parse()?;
        let entry = fx.log.get(internal_id).await?.unwrap();
        assert_eq!(entry.status, MutationStatus::Success);

        let result = execute(
            &fx.schema,
            &fx.admin,
            r#"{
                contributionPlan(code: "XYZ") {
                    totalCount
                    edges { node { code version periodicity contributionLength isDeleted } }
                }
            }"#,
        )
        .await?;
        let connection = &result["data"]["contributionPlan"];
        assert_eq!(connection["totalCount"], 1);
        let node = &connection["edges"][0]["node"];
        assert_eq!(node["code"], "XYZ");
        assert_eq!(node["version"], 1);
        assert_eq!(node["periodicity"], 12);
        assert_eq!(node["contributionLength"], 12);
        assert_eq!(node["isDeleted"], false);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_twice_delete_both() -> Result<()> {
        let fx = setup().await?;
        for code in ["A", "B"] {
            execute(&fx.schema, &fx.admin, &create_plan_mutation(code, fx.product_id, 12)).await?;
        }

        let listed = execute(
            &fx.schema,
            &fx.admin,
            "{ contributionPlan { totalCount edges { node { uuid } } } }",
        )
        .await?;
        assert_eq!(listed["data"]["contributionPlan"]["totalCount"], 2);
        let uuids: Vec<String> = listed["data"]["contributionPlan"]["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|edge| edge["node"]["uuid"].as_str().unwrap().to_string())
            .collect();

        let deleted = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"mutation {{ deleteContributionPlan(input: {{ uuids: ["{}", "{}"] }}) {{ internalId }} }}"#,
                uuids[0], uuids[1]
            ),
        )
        .await?;
        assert_no_errors(&deleted);

        let after = execute(&fx.schema, &fx.admin, "{ contributionPlan { totalCount } }").await?;
        assert_eq!(after["data"]["contributionPlan"]["totalCount"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_required_fields_returns_errors() -> Result<()> {
        let fx = setup().await?;

        let response = execute(
            &fx.schema,
            &fx.admin,
            r#"mutation { createContributionPlan(input: { code: "NOPE" }) { internalId } }"#,
        )
        .await?;
        assert_eq!(error_code(&response), Some("VALIDATION_ERROR"));

        let count = execute(&fx.schema, &fx.admin, "{ contributionPlan { totalCount } }").await?;
        assert_eq!(count["data"]["contributionPlan"]["totalCount"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_without_id_returns_errors() -> Result<()> {
        let fx = setup().await?;

        let response = execute(
            &fx.schema,
            &fx.admin,
            r#"mutation { updateContributionPlan(input: { name: "x" }) { internalId } }"#,
        )
        .await?;
        assert_eq!(error_code(&response), Some("VALIDATION_ERROR"));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_change() -> Result<()> {
        let fx = setup().await?;
        execute(&fx.schema, &fx.admin, &create_plan_mutation("UPD", fx.product_id, 12)).await?;
        let listed = execute(&fx.schema, &fx.admin, "{ contributionPlan { edges { node { id } } } }").await?;
        let id = listed["data"]["contributionPlan"]["edges"][0]["node"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        for periodicity in [12, 6] {
            let response = execute(
                &fx.schema,
                &fx.admin,
                &format!(
                    r#"mutation {{ updateContributionPlan(input: {{ id: "{}", periodicity: {} }}) {{ internalId }} }}"#,
                    id, periodicity
                ),
            )
            .await?;
            assert_no_errors(&response);
        }

        let result = execute(
            &fx.schema,
            &fx.admin,
            "{ contributionPlan { edges { node { version periodicity } } } }",
        )
        .await?;
        let node = &result["data"]["contributionPlan"]["edges"][0]["node"];
        assert_eq!(node["version"], 2);
        assert_eq!(node["periodicity"], 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_replace_leaves_one_active_row() -> Result<()> {
        let fx = setup().await?;
        execute(&fx.schema, &fx.admin, &create_plan_mutation("REP", fx.product_id, 12)).await?;
        let listed = execute(&fx.schema, &fx.admin, "{ contributionPlan { edges { node { uuid } } } }").await?;
        let original = listed["data"]["contributionPlan"]["edges"][0]["node"]["uuid"]
            .as_str()
            .unwrap()
            .to_string();

        let replaced = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"mutation {{ replaceContributionPlan(input: {{ id: "{}", periodicity: 3 }}) {{ internalId }} }}"#,
                original
            ),
        )
        .await?;
        assert_no_errors(&replaced);

        let active = execute(
            &fx.schema,
            &fx.admin,
            "{ contributionPlan { totalCount edges { node { uuid version periodicity replacementUuid } } } }",
        )
        .await?;
        assert_eq!(active["data"]["contributionPlan"]["totalCount"], 1);
        let node = &active["data"]["contributionPlan"]["edges"][0]["node"];
        assert_ne!(node["uuid"], original.as_str());
        assert_eq!(node["version"], 1);
        assert_eq!(node["periodicity"], 3);
        assert!(node["replacementUuid"].is_null());

        let all = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"{{ contributionPlan(applyDefaultValidityFilter: false, id: "{}") {{
                    edges {{ node {{ replacementUuid dateValidTo version }} }}
                }} }}"#,
                original
            ),
        )
        .await?;
        let closed = &all["data"]["contributionPlan"]["edges"][0]["node"];
        assert_eq!(closed["replacementUuid"], node["uuid"]);
        assert!(!closed["dateValidTo"].is_null());
        assert_eq!(closed["version"], 2);

        let reopened = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"mutation {{ updateContributionPlan(input: {{ id: "{}", dateValidTo: null }}) {{ internalId }} }}"#,
                original
            ),
        )
        .await?;
        assert_eq!(error_code(&reopened), Some("NOT_ACTIVE"));

        let still_active = execute(&fx.schema, &fx.admin, "{ contributionPlan { totalCount } }").await?;
        assert_eq!(still_active["data"]["contributionPlan"]["totalCount"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_pagination_with_cursor() -> Result<()> {
        let fx = setup().await?;
        for code in ["P1", "P2", "P3"] {
            execute(&fx.schema, &fx.admin, &create_plan_mutation(code, fx.product_id, 12)).await?;
        }

        let first = execute(
            &fx.schema,
            &fx.admin,
            r#"{ contributionPlan(orderBy: ["code"], first: 2) {
                totalCount
                pageInfo { hasNextPage hasPreviousPage endCursor }
                edges { node { code } }
            } }"#,
        )
        .await?;
        let connection = &first["data"]["contributionPlan"];
        assert_eq!(connection["totalCount"], 3);
        assert_eq!(connection["pageInfo"]["hasNextPage"], true);
        assert_eq!(connection["pageInfo"]["hasPreviousPage"], false);
        assert_eq!(connection["edges"][1]["node"]["code"], "P2");
        let cursor = connection["pageInfo"]["endCursor"].as_str().unwrap();

        let second = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"{{ contributionPlan(orderBy: ["code"], first: 2, after: "{}") {{
                    pageInfo {{ hasNextPage hasPreviousPage }}
                    edges {{ node {{ code }} }}
                }} }}"#,
                cursor
            ),
        )
        .await?;
        let connection = &second["data"]["contributionPlan"];
        assert_eq!(connection["edges"].as_array().unwrap().len(), 1);
        assert_eq!(connection["edges"][0]["node"]["code"], "P3");
        assert_eq!(connection["pageInfo"]["hasNextPage"], false);
        assert_eq!(connection["pageInfo"]["hasPreviousPage"], true);
        Ok(())
    }

    #[tokio::test]
    async fn test_permission_checked_before_query() -> Result<()> {
        let fx = setup().await?;

        let anonymous = execute(
            &fx.schema,
            &Caller::anonymous(),
            "{ contributionPlan { totalCount } }",
        )
        .await?;
        assert_eq!(error_code(&anonymous), Some("PERMISSION_DENIED"));

        let creator = Caller::user(Uuid::new_v4(), [PLAN_CREATE]);
        let denied = execute(&fx.schema, &creator, "{ contributionPlan { totalCount } }").await?;
        assert_eq!(error_code(&denied), Some("PERMISSION_DENIED"));

        let reader = Caller::user(Uuid::new_v4(), [PLAN_QUERY]);
        let allowed = execute(&fx.schema, &reader, "{ contributionPlan { totalCount } }").await?;
        assert_eq!(allowed["data"]["contributionPlan"]["totalCount"], 0);

        let write = execute(
            &fx.schema,
            &reader,
            &create_plan_mutation("RO", fx.product_id, 12),
        )
        .await?;
        assert_eq!(error_code(&write), Some("PERMISSION_DENIED"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bundle_details_resolve_members() -> Result<()> {
        let fx = setup().await?;
        execute(&fx.schema, &fx.admin, &create_plan_mutation("MEM", fx.product_id, 12)).await?;
        let plans = execute(&fx.schema, &fx.admin, "{ contributionPlan { edges { node { id uuid } } } }").await?;
        let plan_id = plans["data"]["contributionPlan"]["edges"][0]["node"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let bundle = execute(
            &fx.schema,
            &fx.admin,
            r#"mutation { createContributionPlanBundle(input: { code: "BUN", name: "Bundle" }) { internalId } }"#,
        )
        .await?;
        assert_no_errors(&bundle);
        let bundles = execute(&fx.schema, &fx.admin, "{ contributionPlanBundle { edges { node { uuid } } } }").await?;
        let bundle_id = bundles["data"]["contributionPlanBundle"]["edges"][0]["node"]["uuid"]
            .as_str()
            .unwrap()
            .to_string();

        let details = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"mutation {{ createContributionPlanBundleDetails(input: {{
                    contributionPlanBundleId: "{}", contributionPlanId: "{}"
                }}) {{ internalId }} }}"#,
                bundle_id, plan_id
            ),
        )
        .await?;
        assert_no_errors(&details);

        let result = execute(
            &fx.schema,
            &fx.admin,
            &format!(
                r#"{{ contributionPlanBundleDetails(contributionPlanBundleId: "{}") {{
                    totalCount
                    edges {{ node {{ contributionPlan {{ code }} contributionPlanBundle {{ code }} }} }}
                }} }}"#,
                bundle_id
            ),
        )
        .await?;
        let connection = &result["data"]["contributionPlanBundleDetails"];
        assert_eq!(connection["totalCount"], 1);
        assert_eq!(connection["edges"][0]["node"]["contributionPlan"]["code"], "MEM");
        assert_eq!(
            connection["edges"][0]["node"]["contributionPlanBundle"]["code"],
            "BUN"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_cursor_is_an_error() -> Result<()> {
        let fx = setup().await?;
        execute(&fx.schema, &fx.admin, &create_plan_mutation("CUR", fx.product_id, 12)).await?;

        let query = format!(
            r#"{{ contributionPlan(after: "{}") {{ totalCount }} }}"#,
            usize::MAX.encode_cursor()
        );
        let result = execute(&fx.schema, &fx.admin, &query).await?;
        let message = result["errors"][0]["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("Invalid cursor"), "{}", result);
        Ok(())
    }
}
