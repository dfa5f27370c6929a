//! Paginated REST reader for the legacy platform.
//!
//! Search endpoints are page/pageSize based with no cursor. A listing ends on
//! an empty page, a short page or once `total_count` items were read. Select
//! attributes come back as option ids; their labels are looked up through
//! the attribute endpoint and cached for the rest of the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

use crate::concurrency::RetryPolicy;
use crate::config::{SourceConfig, SourceMode};
use crate::error::AppError;
use crate::models::{
    OptionAxis, ProductType, SourceAddress, SourceCategory, SourceCustomer, SourceProduct,
    StockInfo, TypedValue,
};
use crate::source::CatalogSource;

/// Top-level product fields carried into the attribute map.
const PRODUCT_FIELDS: [&str; 5] = ["name", "price", "status", "visibility", "weight"];

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<JsonValue>,
    total_count: Option<u64>,
}

/// A search response: the `{ items, total_count }` envelope or a bare array.
/// The array arm must stay first; serde also reads arrays as struct sequences.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchBody {
    Items(Vec<JsonValue>),
    Page(SearchPage),
}

impl From<SearchBody> for SearchPage {
    fn from(body: SearchBody) -> Self {
        match body {
            SearchBody::Items(items) => SearchPage {
                items,
                total_count: None,
            },
            SearchBody::Page(page) => page,
        }
    }
}

fn parse_search_page(value: JsonValue) -> Result<SearchPage, AppError> {
    Ok(serde_json::from_value::<SearchBody>(value)?.into())
}

/// Attribute metadata from `/V1/products/attributes/{code}`.
#[derive(Debug, Clone, Deserialize)]
struct AttributeMeta {
    attribute_code: String,
    #[serde(default)]
    default_frontend_label: Option<String>,
    #[serde(default)]
    options: Vec<AttributeOption>,
}

#[derive(Debug, Clone, Deserialize)]
struct AttributeOption {
    #[serde(default)]
    label: String,
    #[serde(default, deserialize_with = "string_or_number")]
    value: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    })
}

impl AttributeMeta {
    fn label_for(&self, id: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.value == id && !o.value.is_empty())
            .map(|o| o.label.as_str())
            .filter(|l| !l.trim().is_empty())
    }
}

// ============================================================================
// Reader
// ============================================================================

pub struct RestSource {
    client: Client,
    base_url: Url,
    token: String,
    page_size: u32,
    retry: RetryPolicy,
    /// Select attributes whose option ids are replaced by labels.
    label_codes: Vec<String>,
    /// Attribute metadata by code or id; `None` when the lookup failed.
    attributes: Mutex<HashMap<String, Option<AttributeMeta>>>,
}

impl RestSource {
    pub fn new(
        base_url: &str,
        token: &str,
        page_size: u32,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            token: token.to_string(),
            page_size: page_size.max(1),
            retry,
            label_codes: Vec::new(),
            attributes: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &SourceConfig, retry: RetryPolicy) -> Result<Self, AppError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::MissingCredentials("source.base_url".into()))?;
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| AppError::MissingCredentials("source.token".into()))?;
        Self::new(
            base_url,
            token,
            config.page_size,
            Duration::from_secs(config.request_timeout_secs),
            retry,
        )
    }

    /// Attributes whose select labels should be resolved on every product.
    pub fn with_label_codes(mut self, codes: &[String]) -> Self {
        self.label_codes = codes.to_vec();
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url, query: &[(String, String)]) -> Result<JsonValue, AppError> {
        let operation = url.path().to_string();
        self.retry
            .run(&operation, || {
                let request = self
                    .client
                    .get(url.clone())
                    .bearer_auth(&self.token)
                    .query(query);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(AppError::Http {
                            status: status.as_u16(),
                            url: response.url().to_string(),
                            body: response.text().await.unwrap_or_default(),
                        });
                    }
                    Ok(response.json::<JsonValue>().await?)
                }
            })
            .await
    }

    /// Reads every item of a search endpoint.
    async fn search(&self, segments: &[&str]) -> Result<Vec<JsonValue>, AppError> {
        let url = self.endpoint(segments)?;
        let page_size = self.page_size as usize;
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let query = vec![
                ("searchCriteria[pageSize]".to_string(), self.page_size.to_string()),
                ("searchCriteria[currentPage]".to_string(), page.to_string()),
            ];
            let body = parse_search_page(self.get_json(url.clone(), &query).await?)?;
            let received = body.items.len();
            items.extend(body.items);
            tracing::debug!(
                endpoint = %url.path(),
                page,
                received,
                total = ?body.total_count,
                "fetched page"
            );

            if is_last_page(received, page_size, items.len(), body.total_count) {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// Fetches attribute metadata by code or id, at most once per run.
    async fn attribute(&self, key: &str) -> Option<AttributeMeta> {
        if let Ok(cache) = self.attributes.lock() {
            if let Some(cached) = cache.get(key) {
                return cached.clone();
            }
        }

        let fetched = match self.endpoint(&["V1", "products", "attributes", key]) {
            Ok(url) => self.get_json(url, &[]).await,
            Err(err) => Err(err),
        };
        let meta = match fetched.and_then(|v| Ok(serde_json::from_value::<AttributeMeta>(v)?)) {
            Ok(meta) => Some(meta),
            Err(err) => {
                tracing::warn!(attribute = key, error = %err, "attribute lookup failed");
                None
            }
        };

        if let Ok(mut cache) = self.attributes.lock() {
            cache.insert(key.to_string(), meta.clone());
            if let Some(meta) = &meta {
                cache.insert(meta.attribute_code.clone(), Some(meta.clone()));
            }
        }
        meta
    }

    /// Replaces option ids with labels for the given attribute codes.
    async fn resolve_labels(&self, product: &mut SourceProduct, codes: &[String]) {
        for code in codes {
            let Some(raw) = product.attr(code).and_then(TypedValue::display) else {
                continue;
            };
            let Some(meta) = self.attribute(code).await else {
                continue;
            };
            if meta.options.is_empty() {
                continue;
            }
            let labels: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|id| meta.label_for(id).unwrap_or(id).to_string())
                .collect();
            if !labels.is_empty() {
                product
                    .attributes
                    .insert(code.clone(), TypedValue::Text(labels.join(", ")));
            }
        }
    }

    /// Turns configurable option ids into axes with attribute codes.
    async fn resolve_axes(&self, product: &mut SourceProduct, pending: Vec<PendingAxis>) {
        for axis in pending {
            match self.attribute(&axis.attribute_id).await {
                Some(meta) => {
                    let label = axis
                        .label
                        .or(meta.default_frontend_label.clone())
                        .unwrap_or_else(|| meta.attribute_code.clone());
                    product.option_axes.push(OptionAxis {
                        code: meta.attribute_code,
                        label,
                    });
                }
                None => tracing::warn!(
                    sku = %product.sku,
                    attribute_id = %axis.attribute_id,
                    "dropping option axis with unknown attribute"
                ),
            }
        }
    }

    async fn hydrate(&self, item: &JsonValue) -> Option<SourceProduct> {
        let (mut product, pending) = parse_product(item)?;
        self.resolve_axes(&mut product, pending).await;
        let mut codes = self.label_codes.clone();
        codes.extend(product.option_axes.iter().map(|a| a.code.clone()));
        self.resolve_labels(&mut product, &codes).await;
        Some(product)
    }

    async fn product_by_sku(&self, sku: &str) -> Result<JsonValue, AppError> {
        let url = self.endpoint(&["V1", "products", sku])?;
        self.get_json(url, &[]).await
    }
}

#[async_trait]
impl CatalogSource for RestSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Rest
    }

    async fn categories(&self) -> Result<Vec<SourceCategory>, AppError> {
        let items = self.search(&["V1", "categories", "list"]).await?;
        Ok(items.iter().filter_map(parse_category).collect())
    }

    async fn products(&self) -> Result<Vec<SourceProduct>, AppError> {
        let items = self.search(&["V1", "products"]).await?;
        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            match self.hydrate(item).await {
                Some(product) => products.push(product),
                None => tracing::warn!(item = %item, "skipping product without id or sku"),
            }
        }
        products.sort_by_key(|p| p.entity_id);
        Ok(products)
    }

    async fn children(&self, parent: &SourceProduct) -> Result<Vec<SourceProduct>, AppError> {
        let items: Vec<JsonValue> = match parent.product_type {
            ProductType::Simple => return Ok(Vec::new()),
            ProductType::Configurable => {
                let url = self.endpoint(&[
                    "V1",
                    "configurable-products",
                    parent.sku.as_str(),
                    "children",
                ])?;
                match self.get_json(url, &[]).await? {
                    JsonValue::Array(items) => items,
                    _ => Vec::new(),
                }
            }
            ProductType::Parent => {
                let detail = self.product_by_sku(&parent.sku).await?;
                let mut items = Vec::new();
                for sku in linked_skus(&detail) {
                    items.push(self.product_by_sku(&sku).await?);
                }
                items
            }
        };

        let axis_codes: Vec<String> = parent.option_axes.iter().map(|a| a.code.clone()).collect();
        let mut children = Vec::with_capacity(items.len());
        for item in &items {
            if let Some((mut child, _)) = parse_product(item) {
                let mut codes = self.label_codes.clone();
                codes.extend(axis_codes.iter().cloned());
                self.resolve_labels(&mut child, &codes).await;
                children.push(child);
            }
        }
        Ok(children)
    }

    async fn customers(&self) -> Result<Vec<SourceCustomer>, AppError> {
        let items = self.search(&["V1", "customers", "search"]).await?;
        Ok(items.iter().filter_map(parse_customer).collect())
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn is_last_page(received: usize, page_size: usize, collected: usize, total: Option<u64>) -> bool {
    received == 0
        || received < page_size
        || total.is_some_and(|t| collected as u64 >= t)
}

/// Configurable option whose attribute code is not known yet.
#[derive(Debug, Clone, PartialEq)]
struct PendingAxis {
    attribute_id: String,
    label: Option<String>,
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|i| i != 0),
        JsonValue::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn custom_attributes(item: &JsonValue) -> BTreeMap<String, &JsonValue> {
    item.get("custom_attributes")
        .and_then(JsonValue::as_array)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|a| {
                    let code = a.get("attribute_code")?.as_str()?;
                    Some((code.to_string(), a.get("value")?))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_product(item: &JsonValue) -> Option<(SourceProduct, Vec<PendingAxis>)> {
    let entity_id = item.get("id").and_then(as_i64)?;
    let sku = item.get("sku").and_then(as_text)?;
    let type_id = item.get("type_id").and_then(JsonValue::as_str).unwrap_or("simple");
    let mut product = SourceProduct::new(entity_id, sku, ProductType::from_type_id(type_id));

    for field in PRODUCT_FIELDS {
        if let Some(value) = item.get(field) {
            let typed = TypedValue::from_json(value);
            if !typed.is_null() {
                product.attributes.insert(field.to_string(), typed);
            }
        }
    }
    for (code, value) in custom_attributes(item) {
        let typed = TypedValue::from_json(value);
        if !typed.is_null() {
            product.attributes.insert(code, typed);
        }
    }

    let extension = item.get("extension_attributes");

    product.category_ids = extension
        .and_then(|e| e.get("category_links"))
        .and_then(JsonValue::as_array)
        .map(|links| {
            links
                .iter()
                .filter_map(|l| l.get("category_id").and_then(as_i64))
                .collect()
        })
        .unwrap_or_default();
    if product.category_ids.is_empty() {
        if let Some(TypedValue::Text(ids)) = product.attributes.get("category_ids") {
            product.category_ids = ids.split(',').filter_map(|s| s.trim().parse().ok()).collect();
        }
    }

    let mut gallery: Vec<(i64, String)> = item
        .get("media_gallery_entries")
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|e| !e.get("disabled").and_then(as_bool).unwrap_or(false))
                .filter_map(|e| {
                    let file = e.get("file").and_then(as_text)?;
                    let position = e.get("position").and_then(as_i64).unwrap_or(0);
                    Some((position, file))
                })
                .collect()
        })
        .unwrap_or_default();
    gallery.sort_by_key(|(position, _)| *position);
    product.media = gallery.into_iter().map(|(_, file)| file).collect();

    product.stock = extension.and_then(|e| e.get("stock_item")).map(|s| StockInfo {
        qty: s.get("qty").and_then(JsonValue::as_f64).unwrap_or(0.0),
        is_in_stock: s.get("is_in_stock").and_then(as_bool).unwrap_or(false),
        manage_stock: s.get("manage_stock").and_then(as_bool).unwrap_or(true),
    });

    let mut options: Vec<(i64, PendingAxis)> = extension
        .and_then(|e| e.get("configurable_product_options"))
        .and_then(JsonValue::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| {
                    let attribute_id = o.get("attribute_id").and_then(as_text)?;
                    let position = o.get("position").and_then(as_i64).unwrap_or(0);
                    let label = o.get("label").and_then(as_text);
                    Some((position, PendingAxis { attribute_id, label }))
                })
                .collect()
        })
        .unwrap_or_default();
    options.sort_by_key(|(position, _)| *position);

    Some((product, options.into_iter().map(|(_, axis)| axis).collect()))
}

fn linked_skus(detail: &JsonValue) -> Vec<String> {
    detail
        .get("product_links")
        .and_then(JsonValue::as_array)
        .map(|links| {
            links
                .iter()
                .filter(|l| l.get("link_type").and_then(JsonValue::as_str) == Some("associated"))
                .filter_map(|l| l.get("linked_product_sku").and_then(as_text))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_category(item: &JsonValue) -> Option<SourceCategory> {
    let entity_id = item.get("id").and_then(as_i64)?;
    let custom = custom_attributes(item);
    Some(SourceCategory {
        entity_id,
        parent_id: item.get("parent_id").and_then(as_i64).filter(|&p| p != 0),
        name: item
            .get("name")
            .and_then(as_text)
            .unwrap_or_else(|| format!("Category {}", entity_id)),
        url_key: custom.get("url_key").and_then(|v| as_text(v)),
        description: custom.get("description").and_then(|v| as_text(v)),
        level: item.get("level").and_then(as_i64).unwrap_or(0),
        position: item.get("position").and_then(as_i64).unwrap_or(0),
        is_active: item.get("is_active").and_then(as_bool),
    })
}

fn parse_address(item: &JsonValue) -> SourceAddress {
    let text = |key: &str| item.get(key).and_then(as_text);
    let region = item.get("region").and_then(|r| match r {
        JsonValue::Object(_) => r.get("region").and_then(as_text),
        other => as_text(other),
    });
    SourceAddress {
        firstname: text("firstname"),
        lastname: text("lastname"),
        company: text("company"),
        street: item
            .get("street")
            .and_then(JsonValue::as_array)
            .map(|lines| lines.iter().filter_map(as_text).collect())
            .unwrap_or_default(),
        city: text("city"),
        region,
        postcode: text("postcode"),
        country_id: text("country_id"),
        telephone: text("telephone"),
        default_billing: item.get("default_billing").and_then(as_bool).unwrap_or(false),
        default_shipping: item.get("default_shipping").and_then(as_bool).unwrap_or(false),
    }
}

fn parse_customer(item: &JsonValue) -> Option<SourceCustomer> {
    let entity_id = item.get("id").and_then(as_i64)?;
    let addresses: Vec<SourceAddress> = item
        .get("addresses")
        .and_then(JsonValue::as_array)
        .map(|list| list.iter().map(parse_address).collect())
        .unwrap_or_default();
    let telephone = addresses
        .iter()
        .find(|a| a.default_billing)
        .or(addresses.first())
        .and_then(|a| a.telephone.clone());
    Some(SourceCustomer {
        entity_id,
        email: item.get("email").and_then(as_text),
        firstname: item.get("firstname").and_then(as_text),
        lastname: item.get("lastname").and_then(as_text),
        telephone,
        created_at: item.get("created_at").and_then(as_text),
        addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_page_detection() {
        assert!(is_last_page(0, 100, 200, None));
        assert!(is_last_page(40, 100, 140, None));
        assert!(is_last_page(100, 100, 300, Some(300)));
        assert!(!is_last_page(100, 100, 200, Some(300)));
        assert!(!is_last_page(100, 100, 100, None));
    }

    #[test]
    fn test_search_page_accepts_envelope_and_bare_array() {
        let page = parse_search_page(json!({
            "items": [{ "id": 1, "sku": "A" }],
            "total_count": 7
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_count, Some(7));

        let page = parse_search_page(json!([{ "id": 1, "sku": "A" }, { "id": 2, "sku": "B" }]))
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_count, None);

        let page = parse_search_page(json!([])).unwrap();
        assert!(page.items.is_empty());
        assert!(is_last_page(page.items.len(), 100, 0, page.total_count));
    }

    #[test]
    fn test_parse_configurable_product() {
        let item = json!({
            "id": 10,
            "sku": "TEE",
            "name": "Tee",
            "price": 20,
            "visibility": 4,
            "type_id": "configurable",
            "custom_attributes": [
                { "attribute_code": "url_key", "value": "tee" },
                { "attribute_code": "special_price", "value": "15.5" }
            ],
            "extension_attributes": {
                "category_links": [{ "category_id": "3", "position": 0 }],
                "configurable_product_options": [
                    { "attribute_id": "142", "label": "Size", "position": 1 },
                    { "attribute_id": "93", "label": "Color", "position": 0 }
                ]
            },
            "media_gallery_entries": [
                { "file": "/b/2.jpg", "position": 2 },
                { "file": "/a/1.jpg", "position": 1 },
                { "file": "/x/0.jpg", "position": 0, "disabled": true }
            ]
        });

        let (product, axes) = parse_product(&item).unwrap();
        assert_eq!(product.entity_id, 10);
        assert_eq!(product.product_type, ProductType::Configurable);
        assert_eq!(product.name().as_deref(), Some("Tee"));
        assert_eq!(product.text("special_price").as_deref(), Some("15.5"));
        assert_eq!(product.visibility(), Some(4));
        assert_eq!(product.category_ids, vec![3]);
        assert_eq!(product.media, vec!["/a/1.jpg", "/b/2.jpg"]);
        assert_eq!(axes[0].attribute_id, "93");
        assert_eq!(axes[1].label.as_deref(), Some("Size"));
    }

    #[test]
    fn test_parse_product_requires_sku() {
        assert!(parse_product(&json!({ "id": 1 })).is_none());
        assert!(parse_product(&json!({ "id": 1, "sku": "  " })).is_none());
    }

    #[test]
    fn test_parse_category() {
        let item = json!({
            "id": 5,
            "parent_id": 2,
            "name": "Shoes",
            "is_active": false,
            "level": 2,
            "position": 3,
            "custom_attributes": [{ "attribute_code": "url_key", "value": "shoes" }]
        });
        let category = parse_category(&item).unwrap();
        assert_eq!(category.parent_id, Some(2));
        assert_eq!(category.url_key.as_deref(), Some("shoes"));
        assert_eq!(category.is_active, Some(false));
        assert_eq!(category.level, 2);
    }

    #[test]
    fn test_parse_customer_with_addresses() {
        let item = json!({
            "id": 7,
            "email": "ada@example.com",
            "firstname": "Ada",
            "addresses": [
                { "city": "Oslo", "street": ["Main 1", "Apt 2"], "telephone": "111" },
                { "city": "Bergen", "default_billing": true, "telephone": "222",
                  "region": { "region": "Vestland", "region_code": "VL" } }
            ]
        });
        let customer = parse_customer(&item).unwrap();
        assert_eq!(customer.telephone.as_deref(), Some("222"));
        assert_eq!(customer.addresses[0].street, vec!["Main 1", "Apt 2"]);
        assert_eq!(customer.addresses[1].region.as_deref(), Some("Vestland"));
    }

    #[test]
    fn test_linked_skus_only_associated() {
        let detail = json!({
            "product_links": [
                { "link_type": "associated", "linked_product_sku": "A" },
                { "link_type": "related", "linked_product_sku": "B" }
            ]
        });
        assert_eq!(linked_skus(&detail), vec!["A"]);
    }

    #[test]
    fn test_attribute_option_labels() {
        let meta: AttributeMeta = serde_json::from_value(json!({
            "attribute_code": "color",
            "options": [{ "label": " ", "value": "" }, { "label": "Red", "value": 49 }]
        }))
        .unwrap();
        assert_eq!(meta.label_for("49"), Some("Red"));
        assert_eq!(meta.label_for("50"), None);
    }
}
