//! Query Filters
//!
//! [`EntityFilter`] describes a paginated, ordered read of one entity kind.
//! Field names are the domain names (`code`, `periodicity`, `benefit_plan_id`,
//! ...); camelCase spellings coming from GraphQL are normalized on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Comparison operators supported by field filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equality (=)
    Equals,
    /// Case-insensitive substring (LIKE %value%)
    IContains,
    /// Case-insensitive prefix (LIKE value%)
    IStartsWith,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Less than or equal (<=)
    LessThanOrEqual,
}

/// A single `field <op> value` restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

impl FieldFilter {
    pub fn new(
        field: impl AsRef<str>,
        operator: FilterOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: normalize_field(field.as_ref()),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: impl AsRef<str>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(field, FilterOperator::Equals, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key; `-field` in the textual form means descending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl AsRef<str>) -> Self {
        Self {
            field: normalize_field(field.as_ref()),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl AsRef<str>) -> Self {
        Self {
            field: normalize_field(field.as_ref()),
            direction: SortDirection::Desc,
        }
    }

    /// Parses `code`, `-dateCreated` and similar
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw.strip_prefix('+').unwrap_or(raw)),
        }
    }
}

/// Extra restriction produced by row security and validity filtering
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches no rows at all
    MatchNone,
    /// `date_valid_to IS NULL OR date_valid_to > at`
    ValidAt(DateTime<Utc>),
    /// `date_valid_from >= from`
    ValidFromAtLeast(DateTime<Utc>),
    /// `date_valid_to IS NULL OR date_valid_to <= to`
    ValidToAtMost(DateTime<Utc>),
}

/// Filter, order and page specification for entity queries
///
/// # Examples
///
/// ```rust
/// use contribution_plan_core::models::{EntityFilter, FieldFilter, OrderBy};
///
/// let filter = EntityFilter::new()
///     .with_field_filter(FieldFilter::equals("code", "XYZ"))
///     .with_order_by(OrderBy::parse("-dateCreated"))
///     .with_limit(10);
/// assert_eq!(filter.limit, Some(10));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_filters: Vec<FieldFilter>,

    /// `None` and `Some(false)` hide soft-deleted rows; `Some(true)` returns only them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_valid_from_gte: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_valid_to_lte: Option<DateTime<Utc>>,

    /// Absent means apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_default_validity_filter: Option<bool>,

    /// Bundles only: bundles containing a plan with this calculation rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<Uuid>,

    /// Bundles only: bundles containing a plan for this product
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_product: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field filter (can be called multiple times)
    pub fn with_field_filter(mut self, filter: FieldFilter) -> Self {
        self.field_filters.push(filter);
        self
    }

    pub fn with_is_deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = Some(is_deleted);
        self
    }

    pub fn with_date_valid_from_gte(mut self, from: DateTime<Utc>) -> Self {
        self.date_valid_from_gte = Some(from);
        self
    }

    pub fn with_date_valid_to_lte(mut self, to: DateTime<Utc>) -> Self {
        self.date_valid_to_lte = Some(to);
        self
    }

    pub fn with_default_validity_filter(mut self, apply: bool) -> Self {
        self.apply_default_validity_filter = Some(apply);
        self
    }

    pub fn with_calculation(mut self, calculation: Uuid) -> Self {
        self.calculation = Some(calculation);
        self
    }

    pub fn with_insurance_product(mut self, product_id: i64) -> Self {
        self.insurance_product = Some(product_id);
        self
    }

    /// Append a sort key (earlier keys take precedence)
    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// True when explicit validity bounds were supplied
    pub fn has_validity_bounds(&self) -> bool {
        self.date_valid_from_gte.is_some() || self.date_valid_to_lte.is_some()
    }
}

/// `dateValidFrom` → `date_valid_from`; snake_case passes through
pub fn normalize_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for c in field.trim().chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
