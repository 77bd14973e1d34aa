/// Configuration for the contribution plan services
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for a single page, whatever the client asks for
const MAX_SUPPORTED_PAGE_SIZE: usize = 1000;

pub const ENV_DB_PATH: &str = "CONTRIBUTION_PLAN_DB_PATH";
pub const ENV_ROW_SECURITY: &str = "ROW_SECURITY";
pub const ENV_DEFAULT_PAGE_SIZE: &str = "CONTRIBUTION_PLAN_DEFAULT_PAGE_SIZE";
pub const ENV_MAX_PAGE_SIZE: &str = "CONTRIBUTION_PLAN_MAX_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Database file; `None` resolves to `~/.openimis/database/contribution-plan.db`
    pub database_path: Option<PathBuf>,

    /// Anonymous callers see no rows when enabled
    pub row_security: bool,

    /// Page size used when a query gives no `first`
    pub default_page_size: usize,

    /// Largest page a query may request
    pub max_page_size: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            row_security: true,
            default_page_size: 100,
            max_page_size: 500,
        }
    }
}

impl PlanConfig {
    /// Build from process environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup(ENV_ROW_SECURITY) {
            config.row_security = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => return Err(format!("{} must be a boolean, got '{}'", ENV_ROW_SECURITY, other)),
            };
        }

        if let Some(value) = lookup(ENV_DEFAULT_PAGE_SIZE) {
            config.default_page_size = value
                .trim()
                .parse()
                .map_err(|_| format!("{} must be a positive integer", ENV_DEFAULT_PAGE_SIZE))?;
        }

        if let Some(value) = lookup(ENV_MAX_PAGE_SIZE) {
            config.max_page_size = value
                .trim()
                .parse()
                .map_err(|_| format!("{} must be a positive integer", ENV_MAX_PAGE_SIZE))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Database path, resolving the default under the home directory
    pub fn resolve_database_path(&self) -> Result<PathBuf, std::io::Error> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }

        let home_dir = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Cannot determine home directory",
            )
        })?;

        Ok(home_dir
            .join(".openimis")
            .join("database")
            .join("contribution-plan.db"))
    }

    /// Clamp a requested page size into `1..=max_page_size`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_page_size == 0 {
            return Err("default_page_size must be greater than 0".to_string());
        }

        if self.max_page_size == 0 {
            return Err("max_page_size must be greater than 0".to_string());
        }

        if self.max_page_size > MAX_SUPPORTED_PAGE_SIZE {
            return Err(format!(
                "max_page_size cannot exceed {}",
                MAX_SUPPORTED_PAGE_SIZE
            ));
        }

        if self.default_page_size > self.max_page_size {
            return Err("default_page_size cannot exceed max_page_size".to_string());
        }

        Ok(())
    }
}
