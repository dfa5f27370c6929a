//! Read-only snapshots of legacy platform entities.
//!
//! The legacy platform stores most entity fields as EAV rows split across
//! one table per backend type. Both source modes end up producing the same
//! flattened shapes defined here.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

// ============================================================================
// Raw EAV rows
// ============================================================================

/// Storage table family of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Column on the entity table itself (e.g. `sku`).
    Static,
    Varchar,
    Int,
    Text,
    Decimal,
    Datetime,
}

impl BackendType {
    /// Types stored in their own per-type value table.
    pub const VALUE_TABLES: [BackendType; 5] = [
        BackendType::Varchar,
        BackendType::Int,
        BackendType::Text,
        BackendType::Decimal,
        BackendType::Datetime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Static => "static",
            BackendType::Varchar => "varchar",
            BackendType::Int => "int",
            BackendType::Text => "text",
            BackendType::Decimal => "decimal",
            BackendType::Datetime => "datetime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(BackendType::Static),
            "varchar" => Some(BackendType::Varchar),
            "int" => Some(BackendType::Int),
            "text" => Some(BackendType::Text),
            "decimal" => Some(BackendType::Decimal),
            "datetime" => Some(BackendType::Datetime),
            _ => None,
        }
    }
}

/// Attribute metadata from the legacy attribute registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    pub attribute_id: i64,
    pub attribute_code: String,
    pub backend_type: BackendType,
    /// Whether the stored value is an option id that needs a label lookup.
    pub is_select: bool,
}

/// One stored value row for `(entity_id, attribute_id, store_id)`.
///
/// Values are carried as text exactly as stored; conversion to a typed value
/// happens once the authoritative store row has been picked.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttributeValue {
    pub entity_id: i64,
    pub attribute_id: i64,
    pub store_id: i64,
    pub value: Option<String>,
}

// ============================================================================
// Typed values
// ============================================================================

/// An attribute value after backend-type conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Integer(i64),
    Decimal(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl TypedValue {
    /// Converts a stored value according to its backend type.
    ///
    /// NULL and blank values become [`TypedValue::Null`], never the text "null".
    pub fn convert(backend_type: BackendType, raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return TypedValue::Null;
        };

        match backend_type {
            BackendType::Int => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => TypedValue::Integer(n.trunc() as i64),
                _ => TypedValue::Text(raw.to_string()),
            },
            BackendType::Decimal => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => TypedValue::Decimal(n),
                _ => TypedValue::Text(raw.to_string()),
            },
            BackendType::Datetime => parse_timestamp(raw)
                .map(TypedValue::Timestamp)
                .unwrap_or_else(|| TypedValue::Text(raw.to_string())),
            BackendType::Static | BackendType::Varchar | BackendType::Text => {
                TypedValue::Text(raw.to_string())
            }
        }
    }

    /// Converts a REST attribute value. Arrays are joined with commas.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => TypedValue::Null,
            JsonValue::Bool(b) => TypedValue::Integer(i64::from(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => TypedValue::Integer(i),
                None => n.as_f64().map(TypedValue::Decimal).unwrap_or(TypedValue::Null),
            },
            JsonValue::String(s) if s.trim().is_empty() => TypedValue::Null,
            JsonValue::String(s) => TypedValue::Text(s.clone()),
            JsonValue::Array(items) => {
                let joined: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        JsonValue::String(s) => Some(s.clone()),
                        JsonValue::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                if joined.is_empty() {
                    TypedValue::Null
                } else {
                    TypedValue::Text(joined.join(","))
                }
            }
            JsonValue::Object(_) => TypedValue::Text(value.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; text values are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Integer(i) => Some(*i as f64),
            TypedValue::Decimal(d) => Some(*d),
            TypedValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(i) => Some(*i),
            TypedValue::Decimal(d) => Some(d.trunc() as i64),
            TypedValue::Text(s) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
            _ => None,
        }
    }

    /// Human-readable rendering, `None` for null.
    pub fn display(&self) -> Option<String> {
        match self {
            TypedValue::Null => None,
            TypedValue::Integer(i) => Some(i.to_string()),
            TypedValue::Decimal(d) => Some(d.to_string()),
            TypedValue::Timestamp(t) => Some(t.to_rfc3339()),
            TypedValue::Text(s) => Some(s.clone()),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// One resolved attribute of a flattened entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenedAttribute {
    pub attribute_code: String,
    pub backend_type: BackendType,
    pub value: TypedValue,
}

// ============================================================================
// Products
// ============================================================================

/// Legacy product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Simple,
    /// Parent whose children share declared option axes.
    Configurable,
    /// Other grouping parents (grouped, bundle).
    Parent,
}

impl ProductType {
    pub fn from_type_id(type_id: &str) -> Self {
        match type_id {
            "configurable" => ProductType::Configurable,
            "grouped" | "bundle" => ProductType::Parent,
            _ => ProductType::Simple,
        }
    }

    /// Whether this product owns child products.
    pub fn has_children(&self) -> bool {
        !matches!(self, ProductType::Simple)
    }
}

/// An option axis declared on a configurable parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionAxis {
    /// Attribute code children carry the value under, e.g. `color`.
    pub code: String,
    /// Display title of the option, e.g. `Color`.
    pub label: String,
}

/// Inventory snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StockInfo {
    pub qty: f64,
    pub is_in_stock: bool,
    pub manage_stock: bool,
}

/// Visibility value meaning "only sold through a parent".
pub const VISIBILITY_NOT_VISIBLE_INDIVIDUALLY: i64 = 1;

/// A flattened legacy product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceProduct {
    pub entity_id: i64,
    pub sku: String,
    pub product_type: ProductType,
    /// `attribute_code → value`, one authoritative value per code.
    /// Select attributes carry their option label.
    pub attributes: BTreeMap<String, TypedValue>,
    /// Option axes, only declared by configurable parents.
    pub option_axes: Vec<OptionAxis>,
    pub category_ids: Vec<i64>,
    /// Relative media paths in gallery order.
    pub media: Vec<String>,
    pub stock: Option<StockInfo>,
}

impl SourceProduct {
    pub fn new(entity_id: i64, sku: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            entity_id,
            sku: sku.into(),
            product_type,
            attributes: BTreeMap::new(),
            option_axes: Vec::new(),
            category_ids: Vec::new(),
            media: Vec::new(),
            stock: None,
        }
    }

    /// Builds a product from flattened attributes.
    pub fn from_flattened(
        entity_id: i64,
        sku: impl Into<String>,
        product_type: ProductType,
        attributes: &[FlattenedAttribute],
    ) -> Self {
        let mut product = Self::new(entity_id, sku, product_type);
        for attr in attributes {
            if !attr.value.is_null() {
                product
                    .attributes
                    .insert(attr.attribute_code.clone(), attr.value.clone());
            }
        }
        product
    }

    pub fn attr(&self, code: &str) -> Option<&TypedValue> {
        self.attributes.get(code).filter(|v| !v.is_null())
    }

    /// Non-blank display text of an attribute.
    pub fn text(&self, code: &str) -> Option<String> {
        self.attr(code)
            .and_then(TypedValue::display)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn number(&self, code: &str) -> Option<f64> {
        self.attr(code).and_then(TypedValue::as_f64)
    }

    pub fn name(&self) -> Option<String> {
        self.text("name")
    }

    pub fn visibility(&self) -> Option<i64> {
        self.attr("visibility").and_then(TypedValue::as_i64)
    }

    pub fn is_not_visible_individually(&self) -> bool {
        self.visibility() == Some(VISIBILITY_NOT_VISIBLE_INDIVIDUALLY)
    }
}

// ============================================================================
// Categories
// ============================================================================

/// A flattened legacy category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCategory {
    pub entity_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub url_key: Option<String>,
    pub description: Option<String>,
    /// Depth in the tree; 0 is the virtual root.
    pub level: i64,
    /// Position among siblings.
    pub position: i64,
    /// `None` when the source does not carry the flag.
    pub is_active: Option<bool>,
}

// ============================================================================
// Customers
// ============================================================================

/// A legacy customer with its address book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCustomer {
    pub entity_id: i64,
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub telephone: Option<String>,
    pub created_at: Option<String>,
    pub addresses: Vec<SourceAddress>,
}

/// A legacy customer address.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceAddress {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub company: Option<String>,
    pub street: Vec<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postcode: Option<String>,
    pub country_id: Option<String>,
    pub telephone: Option<String>,
    pub default_billing: bool,
    pub default_shipping: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_int_truncates() {
        assert_eq!(
            TypedValue::convert(BackendType::Int, Some("42.9")),
            TypedValue::Integer(42)
        );
        assert_eq!(
            TypedValue::convert(BackendType::Int, Some("-3")),
            TypedValue::Integer(-3)
        );
    }

    #[test]
    fn test_convert_blank_is_null() {
        for ty in [BackendType::Varchar, BackendType::Int, BackendType::Datetime] {
            assert_eq!(TypedValue::convert(ty, None), TypedValue::Null);
            assert_eq!(TypedValue::convert(ty, Some("   ")), TypedValue::Null);
        }
    }

    #[test]
    fn test_convert_datetime() {
        let value = TypedValue::convert(BackendType::Datetime, Some("2023-04-01 10:30:00"));
        match value {
            TypedValue::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2023-04-01T10:30:00+00:00"),
            other => panic!("expected timestamp, got {:?}", other),
        }

        assert_eq!(
            TypedValue::convert(BackendType::Datetime, Some("not a date")),
            TypedValue::Text("not a date".to_string())
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(TypedValue::from_json(&json!(null)), TypedValue::Null);
        assert_eq!(TypedValue::from_json(&json!("")), TypedValue::Null);
        assert_eq!(TypedValue::from_json(&json!(7)), TypedValue::Integer(7));
        assert_eq!(TypedValue::from_json(&json!(19.5)), TypedValue::Decimal(19.5));
        assert_eq!(
            TypedValue::from_json(&json!(["3", 4])),
            TypedValue::Text("3,4".to_string())
        );
    }

    #[test]
    fn test_product_type_from_type_id() {
        assert_eq!(ProductType::from_type_id("configurable"), ProductType::Configurable);
        assert_eq!(ProductType::from_type_id("bundle"), ProductType::Parent);
        assert_eq!(ProductType::from_type_id("virtual"), ProductType::Simple);
        assert!(!ProductType::Simple.has_children());
    }

    #[test]
    fn test_product_text_skips_blank() {
        let mut product = SourceProduct::new(1, "SKU-1", ProductType::Simple);
        product
            .attributes
            .insert("name".into(), TypedValue::Text("  Tee ".into()));
        product
            .attributes
            .insert("color".into(), TypedValue::Text("   ".into()));
        assert_eq!(product.name().as_deref(), Some("Tee"));
        assert_eq!(product.text("color"), None);
    }
}
