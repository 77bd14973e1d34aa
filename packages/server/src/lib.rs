//! Contribution Plan HTTP Server
//!
//! Serves the contribution plan GraphQL schema over HTTP with axum. Caller
//! identity comes from headers set by an upstream gateway (see [`caller`]).
//!
//! # Configuration
//!
//! - `CONTRIBUTION_PLAN_PORT` - listen port (default 3001)
//! - `CORS_ALLOW_ORIGIN` - allowed origin (default: any)
//! - `RUST_LOG` - tracing filter (default `info`)
//! - plus the core settings read by [`PlanConfig::from_env`]

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use contribution_plan_core::graphql::{build_schema, PlanSchema};
use contribution_plan_core::services::{MutationLinker, MutationLogService, PlanService};
use contribution_plan_core::{DatabaseService, PlanConfig};

pub mod caller;
mod endpoints;
mod http_error;

pub use http_error::HttpError;

pub const ENV_PORT: &str = "CONTRIBUTION_PLAN_PORT";
pub const ENV_CORS_ALLOW_ORIGIN: &str = "CORS_ALLOW_ORIGIN";
const DEFAULT_PORT: u16 = 3001;

/// Application state shared across all endpoints
#[derive(Clone)]
pub struct AppState {
    pub schema: PlanSchema,
    pub db: Arc<DatabaseService>,
}

impl AppState {
    /// Open the database and wire services, observers and schema together
    pub async fn from_config(config: PlanConfig) -> anyhow::Result<Self> {
        let db_path = config.resolve_database_path()?;
        tracing::info!("📦 Database: {}", db_path.display());

        let db = Arc::new(DatabaseService::new(db_path).await?);
        let service = PlanService::new(db.clone(), config)
            .with_observer(Arc::new(MutationLinker::new(db.clone())));
        let schema = build_schema(Arc::new(service), MutationLogService::new(db.clone()));

        Ok(Self { schema, db })
    }
}

/// Listener settings for the binary
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_allow_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cors_allow_origin: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var(ENV_PORT) {
            Ok(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("{} must be a port number, got '{}'", ENV_PORT, value))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            cors_allow_origin: std::env::var(ENV_CORS_ALLOW_ORIGIN)
                .ok()
                .filter(|origin| !origin.trim().is_empty()),
        })
    }
}

/// CORS for the GraphQL endpoint; any origin unless one is configured
pub fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let allow_origin = match origin {
        Some(origin) => AllowOrigin::exact(
            origin
                .parse::<HeaderValue>()
                .map_err(|_| anyhow::anyhow!("Invalid {}: '{}'", ENV_CORS_ALLOW_ORIGIN, origin))?,
        ),
        None => AllowOrigin::from(Any),
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(caller::USER_ID_HEADER),
            header::HeaderName::from_static(caller::PERMISSIONS_HEADER),
            header::HeaderName::from_static(caller::SUPERUSER_HEADER),
        ]))
}

pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .merge(endpoints::routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped
///
/// # Errors
///
/// Returns error if the CORS origin is invalid or the server fails to bind.
pub async fn start_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let app = create_router(state, cors_layer(config.cors_allow_origin.as_deref())?);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 Contribution plan server starting on http://{}", addr);
    tracing::info!("📡 GraphQL endpoint: http://{}/graphql", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
