//! Contribution plan HTTP server
//!
//! Usage:
//! ```bash
//! CONTRIBUTION_PLAN_DB_PATH=./data/plans.db cargo run --bin contribution-plan-server
//! ```

use contribution_plan_core::PlanConfig;
use contribution_plan_server::{start_server, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("🚀 openIMIS Contribution Plan Server");

    let config = PlanConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let server_config = ServerConfig::from_env()?;
    tracing::info!(
        "🔧 Row security: {}, page size: {} (max {})",
        config.row_security,
        config.default_page_size,
        config.max_page_size
    );

    let state = AppState::from_config(config).await?;
    start_server(state, server_config).await
}
