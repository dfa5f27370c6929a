//! Expansion of a source product into the target option/variant graph.
//!
//! Pure and synchronous: the caller fetches children and resolves ids, this
//! module only decides titles, handles, options, variants and prices.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value as JsonValue};

use crate::models::{
    make_handle, NewProduct, NewVariant, OptionAxis, OptionDef, PriceDef, ProductStatus,
    SourceProduct, DEFAULT_OPTION_TITLE, DEFAULT_OPTION_VALUE,
};

/// Source status value of an enabled product.
const STATUS_ENABLED: i64 = 1;

/// Synthetic axis for parents whose children share no declared option.
const VARIANT_OPTION_TITLE: &str = "Variant";

/// A product payload with its variants, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDraft {
    /// Product payload; `category_ids` and images are filled in by the caller.
    pub product: NewProduct,
    pub variants: Vec<NewVariant>,
    /// Non-fatal problems found while building.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProductVariantBuilder {
    currency_code: String,
    display_attributes: Vec<String>,
}

impl ProductVariantBuilder {
    pub fn new(currency_code: &str, display_attributes: &[String]) -> Self {
        Self {
            currency_code: currency_code.to_lowercase(),
            display_attributes: display_attributes.to_vec(),
        }
    }

    /// Builds the draft for `parent`.
    ///
    /// `children` is only consulted for configurable and grouping parents;
    /// when such a parent has none the simple-product path is used and a
    /// warning is recorded.
    pub fn build(&self, parent: &SourceProduct, children: &[SourceProduct]) -> ProductDraft {
        let mut warnings = Vec::new();

        let (options, variants) = if parent.product_type.has_children() && !children.is_empty() {
            self.expand_children(parent, children, &mut warnings)
        } else {
            if parent.product_type.has_children() {
                warnings.push(format!(
                    "parent {} has no children, migrating as a simple product",
                    parent.sku
                ));
            }
            self.simple(parent)
        };

        ProductDraft {
            product: self.product_payload(parent, options),
            variants,
            warnings,
        }
    }

    fn product_payload(&self, product: &SourceProduct, options: Vec<OptionDef>) -> NewProduct {
        let name = product.name();
        let url_key = product.text("url_key").unwrap_or_default();
        let handle = make_handle(
            "product",
            &[url_key.as_str(), name.as_deref().unwrap_or(""), product.sku.as_str()],
            product.entity_id,
        );
        let status = match product.attr("status").and_then(|v| v.as_i64()) {
            Some(STATUS_ENABLED) | None => ProductStatus::Published,
            Some(_) => ProductStatus::Draft,
        };

        NewProduct {
            title: name.unwrap_or_else(|| product.sku.clone()),
            handle,
            external_id: product.sku.clone(),
            description: product
                .text("description")
                .or_else(|| product.text("short_description")),
            status,
            options,
            category_ids: Vec::new(),
            images: Vec::new(),
            thumbnail: None,
            weight: product.number("weight"),
            metadata: json!({
                "source_id": product.entity_id,
                "source_sku": product.sku,
                "source_type": product.product_type,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Simple products
    // ------------------------------------------------------------------------

    fn simple(&self, product: &SourceProduct) -> (Vec<OptionDef>, Vec<NewVariant>) {
        let mut values = BTreeMap::new();
        let options = if product.option_axes.is_empty() {
            values.insert(
                DEFAULT_OPTION_TITLE.to_string(),
                DEFAULT_OPTION_VALUE.to_string(),
            );
            vec![OptionDef {
                title: DEFAULT_OPTION_TITLE.to_string(),
                values: vec![DEFAULT_OPTION_VALUE.to_string()],
            }]
        } else {
            product
                .option_axes
                .iter()
                .map(|axis| {
                    let value = product
                        .text(&axis.code)
                        .unwrap_or_else(|| DEFAULT_OPTION_VALUE.to_string());
                    values.insert(axis.label.clone(), value.clone());
                    OptionDef {
                        title: axis.label.clone(),
                        values: vec![value],
                    }
                })
                .collect()
        };

        let title = self
            .display_title(product)
            .or_else(|| product.name())
            .unwrap_or_else(|| product.sku.clone());
        let variant = self.variant(product, None, title, values);
        (options, vec![variant])
    }

    // ------------------------------------------------------------------------
    // Parents with children
    // ------------------------------------------------------------------------

    fn expand_children(
        &self,
        parent: &SourceProduct,
        children: &[SourceProduct],
        warnings: &mut Vec<String>,
    ) -> (Vec<OptionDef>, Vec<NewVariant>) {
        let mut seen_skus = BTreeSet::new();
        let children: Vec<&SourceProduct> = children
            .iter()
            .filter(|child| {
                let fresh = seen_skus.insert(child.sku.clone());
                if !fresh {
                    warnings.push(format!("duplicate child sku {} skipped", child.sku));
                }
                fresh
            })
            .collect();

        let parent_name = parent.name();
        let titles: Vec<String> = children
            .iter()
            .enumerate()
            .map(|(i, child)| self.child_title(child, parent_name.as_deref(), i + 1))
            .collect();

        if parent.option_axes.is_empty() {
            return self.expand_without_axes(parent, &children, titles);
        }

        let axes = dedupe_axes(&parent.option_axes);

        // First known value per axis, used to back-fill children lacking one.
        let fallback: Vec<String> = axes
            .iter()
            .map(|axis| {
                children
                    .iter()
                    .find_map(|c| c.text(&axis.code))
                    .unwrap_or_else(|| DEFAULT_OPTION_VALUE.to_string())
            })
            .collect();

        let mut option_values: Vec<Vec<String>> = vec![Vec::new(); axes.len()];
        let mut variants = Vec::with_capacity(children.len());

        for (child, title) in children.iter().zip(titles) {
            let mut values = BTreeMap::new();
            for (i, axis) in axes.iter().enumerate() {
                let value = child.text(&axis.code).unwrap_or_else(|| {
                    warnings.push(format!(
                        "child {} has no {} value, using {}",
                        child.sku, axis.code, fallback[i]
                    ));
                    fallback[i].clone()
                });
                if !option_values[i].contains(&value) {
                    option_values[i].push(value.clone());
                }
                values.insert(axis.label.clone(), value);
            }
            variants.push(self.variant(child, Some(parent), title, values));
        }

        let options = axes
            .iter()
            .zip(option_values)
            .map(|(axis, values)| OptionDef {
                title: axis.label.clone(),
                values,
            })
            .collect();
        (options, variants)
    }

    /// Children of a grouping parent become values of one synthetic axis.
    fn expand_without_axes(
        &self,
        parent: &SourceProduct,
        children: &[&SourceProduct],
        titles: Vec<String>,
    ) -> (Vec<OptionDef>, Vec<NewVariant>) {
        let mut used = BTreeSet::new();
        let mut values_in_order = Vec::with_capacity(children.len());
        let mut variants = Vec::with_capacity(children.len());

        for (child, title) in children.iter().zip(titles) {
            let value = if used.contains(&title) {
                format!("{} ({})", title, child.sku)
            } else {
                title.clone()
            };
            used.insert(value.clone());
            values_in_order.push(value.clone());

            let mut values = BTreeMap::new();
            values.insert(VARIANT_OPTION_TITLE.to_string(), value);
            variants.push(self.variant(child, Some(parent), title, values));
        }

        let options = vec![OptionDef {
            title: VARIANT_OPTION_TITLE.to_string(),
            values: values_in_order,
        }];
        (options, variants)
    }

    // ------------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------------

    fn variant(
        &self,
        product: &SourceProduct,
        parent: Option<&SourceProduct>,
        title: String,
        options: BTreeMap<String, String>,
    ) -> NewVariant {
        let amount = price_amount(product).or_else(|| parent.and_then(price_amount));
        let prices = amount
            .map(|amount| {
                vec![PriceDef {
                    currency_code: self.currency_code.clone(),
                    amount,
                }]
            })
            .unwrap_or_default();

        let stock = product.stock;
        let mut metadata = json!({
            "source_id": product.entity_id,
            "source_sku": product.sku,
        });
        if let (Some(stock), JsonValue::Object(map)) = (stock, &mut metadata) {
            map.insert("in_stock".to_string(), json!(stock.is_in_stock));
        }

        NewVariant {
            title,
            sku: product.sku.clone(),
            prices,
            options,
            manage_inventory: stock.map(|s| s.manage_stock).unwrap_or(false),
            inventory_quantity: stock.map(|s| s.qty.max(0.0).round() as i64),
            metadata,
        }
    }

    /// Display attributes joined in preference order, when any is set.
    fn display_title(&self, product: &SourceProduct) -> Option<String> {
        let parts: Vec<String> = self
            .display_attributes
            .iter()
            .filter_map(|code| product.text(code))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" / "))
    }

    fn child_title(&self, child: &SourceProduct, parent_name: Option<&str>, n: usize) -> String {
        if let Some(title) = self.display_title(child) {
            return title;
        }
        match child.name() {
            Some(name) if Some(name.as_str()) != parent_name => name,
            _ => format!("Variant {}", n),
        }
    }
}

/// Drops axes repeating a code or title, keeping the first.
fn dedupe_axes(axes: &[OptionAxis]) -> Vec<OptionAxis> {
    let mut seen = BTreeSet::new();
    axes.iter()
        .filter(|a| seen.insert(a.code.clone()) && !a.label.trim().is_empty())
        .cloned()
        .fold(Vec::new(), |mut acc: Vec<OptionAxis>, axis| {
            if !acc.iter().any(|a| a.label.eq_ignore_ascii_case(&axis.label)) {
                acc.push(axis);
            }
            acc
        })
}

/// Effective price in minor units.
///
/// A special price wins when it is positive and not above the base price
/// (or there is no base price); otherwise the base price is used.
pub fn price_amount(product: &SourceProduct) -> Option<i64> {
    let base = product.number("price").filter(|p| p.is_finite() && *p >= 0.0);
    let special = product
        .number("special_price")
        .filter(|p| p.is_finite() && *p > 0.0);

    let effective = match (special, base) {
        (Some(special), Some(base)) if special <= base => Some(special),
        (Some(special), None) => Some(special),
        (_, base) => base,
    };
    effective.map(to_minor_units)
}

/// `round(price × 100)`.
pub fn to_minor_units(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_display_attributes;
    use crate::models::{ProductType, StockInfo, TypedValue};

    fn builder() -> ProductVariantBuilder {
        ProductVariantBuilder::new("USD", &default_display_attributes())
    }

    fn product(id: i64, sku: &str, ty: ProductType, attrs: &[(&str, TypedValue)]) -> SourceProduct {
        let mut p = SourceProduct::new(id, sku, ty);
        for (code, value) in attrs {
            p.attributes.insert(code.to_string(), value.clone());
        }
        p
    }

    fn text(s: &str) -> TypedValue {
        TypedValue::Text(s.to_string())
    }

    fn axis(code: &str, label: &str) -> OptionAxis {
        OptionAxis {
            code: code.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_simple_product_gets_default_option() {
        let p = product(
            1,
            "MUG",
            ProductType::Simple,
            &[("name", text("Mug")), ("price", TypedValue::Decimal(12.5))],
        );
        let draft = builder().build(&p, &[]);

        assert_eq!(draft.product.options.len(), 1);
        assert_eq!(draft.product.options[0].title, DEFAULT_OPTION_TITLE);
        assert_eq!(draft.variants.len(), 1);
        let variant = &draft.variants[0];
        assert_eq!(variant.sku, "MUG");
        assert_eq!(
            variant.options.get(DEFAULT_OPTION_TITLE).map(String::as_str),
            Some(DEFAULT_OPTION_VALUE)
        );
        assert_eq!(
            variant.prices,
            vec![PriceDef {
                currency_code: "usd".into(),
                amount: 1250
            }]
        );
        assert_eq!(draft.product.handle, "mug");
        assert_eq!(draft.product.external_id, "MUG");
    }

    #[test]
    fn test_special_price_rules() {
        let with = |attrs: &[(&str, f64)]| {
            let attrs: Vec<(&str, TypedValue)> = attrs
                .iter()
                .map(|(code, v)| (*code, TypedValue::Decimal(*v)))
                .collect();
            price_amount(&product(1, "X", ProductType::Simple, &attrs))
        };

        assert_eq!(with(&[("price", 20.0), ("special_price", 15.0)]), Some(1500));
        assert_eq!(with(&[("price", 20.0), ("special_price", 25.0)]), Some(2000));
        assert_eq!(with(&[("price", 20.0), ("special_price", 0.0)]), Some(2000));
        assert_eq!(with(&[("special_price", 9.99)]), Some(999));
        assert_eq!(with(&[("price", 19.999)]), Some(2000));
        assert_eq!(with(&[]), None);
    }

    #[test]
    fn test_configurable_axis_completeness() {
        let mut parent = product(
            10,
            "TEE",
            ProductType::Configurable,
            &[("name", text("Tee")), ("price", TypedValue::Decimal(20.0))],
        );
        parent.option_axes = vec![axis("size", "Size"), axis("color", "Color")];

        let children = vec![
            product(
                11,
                "TEE-S-RED",
                ProductType::Simple,
                &[("size", text("S")), ("color", text("Red"))],
            ),
            product(12, "TEE-M", ProductType::Simple, &[("size", text("M"))]),
        ];
        let draft = builder().build(&parent, &children);

        assert_eq!(draft.variants.len(), 2);
        for variant in &draft.variants {
            assert!(variant.options.contains_key("Size"));
            assert!(variant.options.contains_key("Color"));
        }
        assert_eq!(draft.variants[1].options["Color"], "Red");
        assert_eq!(
            draft.product.options[0],
            OptionDef {
                title: "Size".into(),
                values: vec!["S".into(), "M".into()]
            }
        );
        assert_eq!(draft.product.options[1].values, vec!["Red".to_string()]);
        // Children inherit the parent's price when they carry none.
        assert_eq!(draft.variants[0].prices[0].amount, 2000);
        assert_eq!(draft.warnings.len(), 1);
    }

    #[test]
    fn test_axis_without_any_value_defaults() {
        let mut parent = product(10, "TEE", ProductType::Configurable, &[]);
        parent.option_axes = vec![axis("color", "Color")];
        let children = vec![product(11, "TEE-1", ProductType::Simple, &[])];

        let draft = builder().build(&parent, &children);
        assert_eq!(draft.variants[0].options["Color"], DEFAULT_OPTION_VALUE);
    }

    #[test]
    fn test_variant_titles() {
        let mut parent = product(10, "TEE", ProductType::Configurable, &[("name", text("Tee"))]);
        parent.option_axes = vec![axis("size", "Size")];
        let children = vec![
            product(11, "A", ProductType::Simple, &[("size", text("S")), ("color", text("Red"))]),
            product(12, "B", ProductType::Simple, &[("name", text("Tee Special"))]),
            product(13, "C", ProductType::Simple, &[("name", text("Tee"))]),
        ];
        let draft = builder().build(&parent, &children);

        assert_eq!(draft.variants[0].title, "S / Red");
        assert_eq!(draft.variants[1].title, "Tee Special");
        assert_eq!(draft.variants[2].title, "Variant 3");
    }

    #[test]
    fn test_configurable_without_children_degrades() {
        let mut parent = product(10, "TEE", ProductType::Configurable, &[("name", text("Tee"))]);
        parent.option_axes = vec![axis("size", "Size")];
        let draft = builder().build(&parent, &[]);

        assert_eq!(draft.variants.len(), 1);
        assert_eq!(draft.variants[0].sku, "TEE");
        assert_eq!(draft.variants[0].options["Size"], DEFAULT_OPTION_VALUE);
        assert_eq!(draft.warnings.len(), 1);
        assert!(draft.warnings[0].contains("no children"));
    }

    #[test]
    fn test_grouped_children_use_synthetic_axis() {
        let parent = product(20, "SET", ProductType::Parent, &[("name", text("Set"))]);
        let children = vec![
            product(21, "SET-A", ProductType::Simple, &[("name", text("Cup"))]),
            product(22, "SET-B", ProductType::Simple, &[("name", text("Cup"))]),
        ];
        let draft = builder().build(&parent, &children);

        assert_eq!(draft.product.options[0].title, VARIANT_OPTION_TITLE);
        assert_eq!(
            draft.product.options[0].values,
            vec!["Cup".to_string(), "Cup (SET-B)".to_string()]
        );
        assert_eq!(draft.variants[1].options[VARIANT_OPTION_TITLE], "Cup (SET-B)");
    }

    #[test]
    fn test_stock_lives_on_variant() {
        let mut p = product(1, "MUG", ProductType::Simple, &[]);
        p.stock = Some(StockInfo {
            qty: 7.0,
            is_in_stock: true,
            manage_stock: true,
        });
        let draft = builder().build(&p, &[]);

        assert_eq!(draft.variants[0].inventory_quantity, Some(7));
        assert!(draft.variants[0].manage_inventory);
        assert_eq!(draft.product.metadata.get("qty"), None);
    }

    #[test]
    fn test_disabled_product_is_draft() {
        let p = product(1, "OLD", ProductType::Simple, &[("status", TypedValue::Integer(2))]);
        assert_eq!(builder().build(&p, &[]).product.status, ProductStatus::Draft);
    }
}
