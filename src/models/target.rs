//! Payloads and references for the flat target catalog.
//!
//! The target product model is `product → options → variants → prices`.
//! These types are backend-neutral; each adapter maps them onto its own
//! request shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Option title used when a product has no real option axis.
pub const DEFAULT_OPTION_TITLE: &str = "Default";
/// Option value used when a variant has no value for an axis.
pub const DEFAULT_OPTION_VALUE: &str = "Default";

// ============================================================================
// Categories
// ============================================================================

/// Category create payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub handle: String,
    pub parent_category_id: Option<String>,
    pub is_active: bool,
    pub rank: i64,
    pub description: Option<String>,
    pub metadata: JsonValue,
}

/// A category that exists in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCategory {
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_category_id: Option<String>,
}

// ============================================================================
// Products and variants
// ============================================================================

/// Publication status of a created product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Published,
}

/// An option defined on a product together with its allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionDef {
    pub title: String,
    pub values: Vec<String>,
}

/// A price in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceDef {
    pub currency_code: String,
    pub amount: i64,
}

/// Product create payload, without variants.
///
/// Variants are created one by one after the product exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProduct {
    pub title: String,
    pub handle: String,
    pub external_id: String,
    pub description: Option<String>,
    pub status: ProductStatus,
    pub options: Vec<OptionDef>,
    /// Target category ids.
    pub category_ids: Vec<String>,
    pub images: Vec<String>,
    pub thumbnail: Option<String>,
    pub weight: Option<f64>,
    pub metadata: JsonValue,
}

/// Variant create payload. Price and stock always live here, never on the product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewVariant {
    pub title: String,
    pub sku: String,
    pub prices: Vec<PriceDef>,
    /// `option title → value`, one entry per product option.
    pub options: BTreeMap<String, String>,
    pub manage_inventory: bool,
    pub inventory_quantity: Option<i64>,
    pub metadata: JsonValue,
}

/// A product that exists in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProduct {
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: String,
}

/// A variant that exists in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetVariant {
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: String,
}

/// Non-structural fields refreshed on an existing product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductImagesUpdate {
    pub images: Vec<String>,
    pub thumbnail: Option<String>,
    pub metadata: JsonValue,
}

// ============================================================================
// Customers
// ============================================================================

/// Customer create payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCustomer {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub metadata: JsonValue,
}

/// A customer that exists in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCustomer {
    pub id: String,
    pub email: String,
}

/// Customer address create payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewAddress {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub phone: Option<String>,
    pub is_default_billing: bool,
    pub is_default_shipping: bool,
}

/// An address already stored on a target customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAddress {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub address_1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

fn same_field(a: &Option<String>, b: &Option<String>) -> bool {
    let norm = |v: &Option<String>| {
        v.as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    };
    norm(a) == norm(b)
}

impl NewAddress {
    /// Whether `stored` is this address: same street line, city, postcode
    /// and country, ignoring case and surrounding whitespace.
    pub fn same_place(&self, stored: &TargetAddress) -> bool {
        same_field(&self.address_1, &stored.address_1)
            && same_field(&self.city, &stored.city)
            && same_field(&self.postal_code, &stored.postal_code)
            && same_field(&self.country_code, &stored.country_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_place_ignores_case_and_blanks() {
        let address = NewAddress {
            address_1: Some("1 Main St".into()),
            city: Some("London".into()),
            country_code: Some("gb".into()),
            postal_code: Some(" ".into()),
            ..Default::default()
        };
        let stored = TargetAddress {
            id: "addr_1".into(),
            address_1: Some("1 main st ".into()),
            city: Some("LONDON".into()),
            postal_code: None,
            country_code: Some("GB".into()),
        };
        assert!(address.same_place(&stored));

        let elsewhere = TargetAddress {
            city: Some("Leeds".into()),
            ..stored
        };
        assert!(!address.same_place(&elsewhere));
    }
}
