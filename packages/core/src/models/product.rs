//! Benefit Plan Products
//!
//! Plans reference a product through `BenefitPlanID`. Products are owned by
//! another module; this table exists so the reference can be enforced.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Coverage period in months
    pub insurance_period: Option<i64>,
}
