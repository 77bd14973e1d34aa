//! Caller Identity, Permissions and Row Security
//!
//! Permissions are a static table from (entity kind, operation) to the
//! permission codes a caller must hold. The check runs before any SQL.
//! Row security then adds predicates to every query: anonymous callers see
//! nothing, and the validity window hides closed rows unless the query
//! asks otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::models::{EntityFilter, EntityKind, Predicate};
use crate::services::PlanServiceError;

/// Identity and granted permissions of whoever issued a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    /// `None` for anonymous callers
    pub user_id: Option<Uuid>,
    pub is_superuser: bool,
    pub permissions: HashSet<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user<I, S>(user_id: Uuid, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: Some(user_id),
            is_superuser: false,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn superuser(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            is_superuser: true,
            permissions: HashSet::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Codes from `required` this caller does not hold
    pub fn missing_permissions(&self, required: &[&str]) -> Vec<String> {
        if self.is_superuser {
            return Vec::new();
        }
        required
            .iter()
            .filter(|code| !self.permissions.contains(**code))
            .map(|code| code.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Query,
    Create,
    Update,
    Delete,
    Replace,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Query => "query",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Replace => "replace",
        })
    }
}

pub const BUNDLE_QUERY: &str = "151101";
pub const BUNDLE_CREATE: &str = "151102";
pub const BUNDLE_UPDATE: &str = "151103";
pub const BUNDLE_DELETE: &str = "151104";
pub const BUNDLE_REPLACE: &str = "151106";

pub const PLAN_QUERY: &str = "151201";
pub const PLAN_CREATE: &str = "151202";
pub const PLAN_UPDATE: &str = "151203";
pub const PLAN_DELETE: &str = "151204";
pub const PLAN_REPLACE: &str = "151206";

pub const PAYMENT_PLAN_QUERY: &str = "157101";
pub const PAYMENT_PLAN_CREATE: &str = "157102";
pub const PAYMENT_PLAN_UPDATE: &str = "157103";
pub const PAYMENT_PLAN_DELETE: &str = "157104";
pub const PAYMENT_PLAN_REPLACE: &str = "157106";

/// Permission codes required for `operation` on `kind`
///
/// Bundle details are read with both bundle and plan query rights and
/// written with the bundle update right.
pub fn required_permissions(kind: EntityKind, operation: Operation) -> &'static [&'static str] {
    use EntityKind::*;
    use Operation::*;

    match (kind, operation) {
        (ContributionPlanBundle, Query) => &[BUNDLE_QUERY],
        (ContributionPlanBundle, Create) => &[BUNDLE_CREATE],
        (ContributionPlanBundle, Update) => &[BUNDLE_UPDATE],
        (ContributionPlanBundle, Delete) => &[BUNDLE_DELETE],
        (ContributionPlanBundle, Replace) => &[BUNDLE_REPLACE],

        (ContributionPlan, Query) => &[PLAN_QUERY],
        (ContributionPlan, Create) => &[PLAN_CREATE],
        (ContributionPlan, Update) => &[PLAN_UPDATE],
        (ContributionPlan, Delete) => &[PLAN_DELETE],
        (ContributionPlan, Replace) => &[PLAN_REPLACE],

        (ContributionPlanBundleDetails, Query) => &[BUNDLE_QUERY, PLAN_QUERY],
        (ContributionPlanBundleDetails, _) => &[BUNDLE_UPDATE],

        (PaymentPlan, Query) => &[PAYMENT_PLAN_QUERY],
        (PaymentPlan, Create) => &[PAYMENT_PLAN_CREATE],
        (PaymentPlan, Update) => &[PAYMENT_PLAN_UPDATE],
        (PaymentPlan, Delete) => &[PAYMENT_PLAN_DELETE],
        (PaymentPlan, Replace) => &[PAYMENT_PLAN_REPLACE],
    }
}

/// Reject callers missing any permission required for `operation` on `kind`
pub fn authorize(
    caller: &Caller,
    kind: EntityKind,
    operation: Operation,
) -> Result<(), PlanServiceError> {
    let missing = caller.missing_permissions(required_permissions(kind, operation));
    if missing.is_empty() {
        Ok(())
    } else {
        tracing::warn!(
            user = ?caller.user_id,
            %kind,
            %operation,
            ?missing,
            "Rejected unauthorized request"
        );
        Err(PlanServiceError::permission_denied(kind, operation.to_string(), missing))
    }
}

/// Extra predicates for a query issued by `caller`
///
/// - Anonymous caller with row security on: match nothing
/// - Explicit `date_valid_from_gte` / `date_valid_to_lte`: bound the window
/// - Otherwise, unless `apply_default_validity_filter` is false: only rows
///   still valid at `now`
pub fn row_security_predicates(
    caller: &Caller,
    filter: &EntityFilter,
    row_security: bool,
    now: DateTime<Utc>,
) -> Vec<Predicate> {
    let mut predicates = Vec::new();

    if row_security && caller.is_anonymous() {
        predicates.push(Predicate::MatchNone);
    }

    if filter.has_validity_bounds() {
        if let Some(from) = filter.date_valid_from_gte {
            predicates.push(Predicate::ValidFromAtLeast(from));
        }
        if let Some(to) = filter.date_valid_to_lte {
            predicates.push(Predicate::ValidToAtMost(to));
        }
    } else if filter.apply_default_validity_filter.unwrap_or(true) {
        predicates.push(Predicate::ValidAt(now));
    }

    predicates
}
