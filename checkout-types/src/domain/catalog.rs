//! Catalog entries the settlement engine reads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Currency;

/// A sellable unit (for example "86 Diamonds") of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Sku {
    pub code: String,
    pub product_code: String,
    pub name: String,
    /// Unit price in minor units.
    pub price: i64,
    pub currency: Currency,
    pub active: bool,
}
