//! Business Services
//!
//! - `PlanService` - create, update, delete, replace and query for all four
//!   versioned entity kinds
//! - `MutationLogService` - mutation log bookkeeping for GraphQL mutations
//! - `security` - caller identity, the permission table and row security
//!
//! Services own the rules (permissions, validation, versioning) and call the
//! `db_*` storage methods inside transactions.

pub mod error;
pub mod mutation_log;
pub mod plan_service;
pub mod security;

pub use error::PlanServiceError;
pub use mutation_log::{MutationLinker, MutationLogService, MutationObserver};
pub use plan_service::{
    ContributionLengthHook, Page, PatchOf, PlanService, Replacement, StoredData,
    ValidateReferences,
};
pub use security::{authorize, required_permissions, row_security_predicates, Caller, Operation};
