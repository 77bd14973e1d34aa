//! Data Models
//!
//! This module contains the data structures shared by the contribution plan
//! services:
//!
//! - [`BusinessMeta`] / [`Record`] - versioned, soft-deletable entity shape
//! - Plan, bundle and bundle-details data with their partial patches
//! - [`EntityFilter`] - query filters, ordering and pagination
//!
//! Each entity kind is bound to its data type through the [`Entity`] marker
//! trait so services and storage can be written once for all four tables.

mod business;
mod bundle;
mod filter;
mod mutation;
mod plan;
mod product;

pub use business::{
    now_utc, BusinessInput, BusinessMeta, Entity, EntityData, EntityInput, EntityKind,
    HistoryEntry, HistoryType, Record, ValidationError,
};
pub use bundle::{
    BundleData, BundleDetailsData, BundleDetailsPatch, BundleDetailsRecord, BundlePatch,
    BundleRecord, ContributionPlanBundle, ContributionPlanBundleDetails,
};
pub use filter::{
    normalize_field, EntityFilter, FieldFilter, FilterOperator, OrderBy, Predicate,
    SortDirection,
};
pub use plan::{
    ContributionPlan, ContributionPlanRecord, PaymentPlan, PaymentPlanRecord, PlanData,
    PlanPatch,
};
pub use mutation::{MutationLogEntry, MutationStatus};
pub use product::Product;
