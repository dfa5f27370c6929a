//! Remote HTTP admin API backend.
//!
//! One request per write. The admin API rejects `inventory_quantity` on
//! variant create, so the source quantity travels in variant metadata
//! instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use url::Url;

use crate::backends::traits::{BackendKind, TargetBackend};
use crate::config::TargetConfig;
use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, ProductImagesUpdate,
    TargetAddress, TargetCategory, TargetCustomer, TargetProduct, TargetVariant,
};

/// Default `limit` for paginated admin list calls.
const PAGE_SIZE: usize = 100;

/// How requests authenticate against the admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    Bearer(String),
    /// Secret API key, sent as Basic auth with an empty password.
    ApiKey(String),
}

/// [`TargetBackend`] over the remote admin API.
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    auth: HttpAuth,
    page_size: usize,
    verbose: bool,
}

impl HttpBackend {
    pub fn new(base_url: &str, auth: HttpAuth, timeout: Duration) -> Result<Self, AppError> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eav-migrate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            auth,
            page_size: PAGE_SIZE,
            verbose: false,
        })
    }

    /// Builds the backend from `[target]`, preferring the bearer token.
    pub fn from_config(config: &TargetConfig, verbose: bool) -> Result<Self, AppError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::MissingCredentials("target.base_url".into()))?;

        let token = config.token.as_deref().filter(|s| !s.trim().is_empty());
        let api_key = config.api_key.as_deref().filter(|s| !s.trim().is_empty());
        let auth = match (token, api_key) {
            (Some(token), _) => HttpAuth::Bearer(token.to_string()),
            (None, Some(key)) => HttpAuth::ApiKey(key.to_string()),
            (None, None) => {
                return Err(AppError::MissingCredentials(
                    "target.token or target.api_key".into(),
                ))
            }
        };

        Ok(Self::new(
            base_url,
            auth,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_verbose(verbose))
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Page size for paginated list calls.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Capability check: an authenticated list call must succeed.
    pub async fn probe(&self) -> Result<(), String> {
        self.get::<JsonValue>("admin/products", &[("limit", "1")])
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    // ------------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------------

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, AppError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let builder = self.client.request(method, url);
        Ok(match &self.auth {
            HttpAuth::Bearer(token) => builder.bearer_auth(token),
            HttpAuth::ApiKey(key) => builder.basic_auth(key, Some("")),
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<JsonValue, AppError> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if self.verbose {
                tracing::debug!(
                    status = status.as_u16(),
                    %url,
                    body = %body,
                    "admin API error body"
                );
            }
            return Err(AppError::Http {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let builder = self.request(Method::GET, path)?.query(query);
        let value = self.send(builder).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, AppError> {
        let builder = self.request(Method::POST, path)?.json(body);
        self.send(builder).await
    }

    /// Reads every page of an offset/limit list endpoint. Stops on a short
    /// page or once `count` items were read.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Vec<T>, AppError> {
        let limit = self.page_size.to_string();
        let mut items = Vec::new();
        loop {
            let offset = items.len().to_string();
            let value: JsonValue = self
                .get(path, &[("offset", offset.as_str()), ("limit", limit.as_str())])
                .await?;
            let count = value.get("count").and_then(JsonValue::as_u64);
            let page: Vec<T> = field(value, key)?;
            let received = page.len();
            items.extend(page);

            if received < self.page_size || count.is_some_and(|c| items.len() as u64 >= c) {
                return Ok(items);
            }
        }
    }
}

/// Pulls `key` out of a response envelope such as `{"products": [...]}`.
fn field<T: DeserializeOwned>(mut value: JsonValue, key: &str) -> Result<T, AppError> {
    let inner = value
        .get_mut(key)
        .map(JsonValue::take)
        .ok_or_else(|| AppError::Internal(format!("response is missing '{}'", key)))?;
    Ok(serde_json::from_value(inner)?)
}

// ============================================================================
// Request bodies
// ============================================================================

fn category_body(category: &NewCategory) -> JsonValue {
    json!({
        "name": category.name,
        "handle": category.handle,
        "parent_category_id": category.parent_category_id,
        "is_active": category.is_active,
        "rank": category.rank,
        "description": category.description,
        "metadata": category.metadata,
    })
}

fn product_body(product: &NewProduct) -> JsonValue {
    let options: Vec<JsonValue> = product
        .options
        .iter()
        .map(|o| json!({ "title": o.title, "values": o.values }))
        .collect();
    let categories: Vec<JsonValue> = product
        .category_ids
        .iter()
        .map(|id| json!({ "id": id }))
        .collect();
    let images: Vec<JsonValue> = product
        .images
        .iter()
        .map(|url| json!({ "url": url }))
        .collect();

    json!({
        "title": product.title,
        "handle": product.handle,
        "external_id": product.external_id,
        "description": product.description,
        "status": product.status,
        "options": options,
        "categories": categories,
        "images": images,
        "thumbnail": product.thumbnail,
        "weight": product.weight,
        "metadata": product.metadata,
    })
}

fn images_body(update: &ProductImagesUpdate) -> JsonValue {
    let images: Vec<JsonValue> = update
        .images
        .iter()
        .map(|url| json!({ "url": url }))
        .collect();
    json!({
        "images": images,
        "thumbnail": update.thumbnail,
        "metadata": update.metadata,
    })
}

fn variant_body(variant: &NewVariant) -> JsonValue {
    let mut metadata = match &variant.metadata {
        JsonValue::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(qty) = variant.inventory_quantity {
        metadata.insert("source_qty".to_string(), json!(qty));
    }
    json!({
        "title": variant.title,
        "sku": variant.sku,
        "prices": variant.prices,
        "options": variant.options,
        "manage_inventory": variant.manage_inventory,
        "metadata": metadata,
    })
}

fn customer_body(customer: &NewCustomer) -> JsonValue {
    json!({
        "email": customer.email,
        "first_name": customer.first_name,
        "last_name": customer.last_name,
        "phone": customer.phone,
        "metadata": customer.metadata,
    })
}

// ============================================================================
// Adapter
// ============================================================================

#[async_trait]
impl TargetBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn find_category_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<TargetCategory>, AppError> {
        let value: JsonValue = self
            .get("admin/product-categories", &[("handle", handle), ("limit", "1")])
            .await?;
        let found: Vec<TargetCategory> = field(value, "product_categories")?;
        Ok(found.into_iter().find(|c| c.handle == handle))
    }

    async fn create_categories(
        &self,
        categories: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError> {
        let mut created = Vec::with_capacity(categories.len());
        for category in &categories {
            let value = self
                .post("admin/product-categories", &category_body(category))
                .await?;
            created.push(field(value, "product_category")?);
        }
        Ok(created)
    }

    async fn find_product_by_handle_or_external_id(
        &self,
        handle: &str,
        external_id: &str,
    ) -> Result<Option<TargetProduct>, AppError> {
        let value: JsonValue = self
            .get("admin/products", &[("external_id", external_id), ("limit", "1")])
            .await?;
        let by_external: Vec<TargetProduct> = field(value, "products")?;
        if let Some(product) = by_external
            .into_iter()
            .find(|p| p.external_id.as_deref() == Some(external_id))
        {
            return Ok(Some(product));
        }

        let value: JsonValue = self
            .get("admin/products", &[("handle", handle), ("limit", "1")])
            .await?;
        let by_handle: Vec<TargetProduct> = field(value, "products")?;
        Ok(by_handle.into_iter().find(|p| p.handle == handle))
    }

    async fn create_product(&self, product: &NewProduct) -> Result<TargetProduct, AppError> {
        let value = self.post("admin/products", &product_body(product)).await?;
        field(value, "product")
    }

    async fn update_product_images(
        &self,
        product_id: &str,
        update: &ProductImagesUpdate,
    ) -> Result<(), AppError> {
        self.post(&format!("admin/products/{}", product_id), &images_body(update))
            .await?;
        Ok(())
    }

    async fn create_variant(
        &self,
        product_id: &str,
        variant: &NewVariant,
    ) -> Result<TargetVariant, AppError> {
        let value = self
            .post(
                &format!("admin/products/{}/variants", product_id),
                &variant_body(variant),
            )
            .await?;

        if value.get("variant").is_some() {
            return field(value, "variant");
        }

        // Newer admin APIs answer with the parent product instead.
        let product: JsonValue = field(value, "product")?;
        let variants: Vec<TargetVariant> = field(product, "variants")?;
        variants
            .into_iter()
            .find(|v| v.sku.as_deref() == Some(variant.sku.as_str()))
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "created variant '{}' missing from response",
                    variant.sku
                ))
            })
    }

    async fn list_product_variants(
        &self,
        product_id: &str,
    ) -> Result<Vec<TargetVariant>, AppError> {
        self.list_all(&format!("admin/products/{}/variants", product_id), "variants")
            .await
    }

    async fn link_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError> {
        self.post(
            &format!("admin/sales-channels/{}/products", sales_channel_id),
            &json!({ "add": product_ids }),
        )
        .await?;
        Ok(())
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<TargetCustomer>, AppError> {
        let value: JsonValue = self
            .get("admin/customers", &[("email", email), ("limit", "1")])
            .await?;
        let found: Vec<TargetCustomer> = field(value, "customers")?;
        Ok(found
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email)))
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<TargetCustomer, AppError> {
        let value = self.post("admin/customers", &customer_body(customer)).await?;
        field(value, "customer")
    }

    async fn create_customer_address(
        &self,
        customer_id: &str,
        address: &NewAddress,
    ) -> Result<(), AppError> {
        let body = serde_json::to_value(address)?;
        self.post(&format!("admin/customers/{}/addresses", customer_id), &body)
            .await?;
        Ok(())
    }

    async fn list_customer_addresses(
        &self,
        customer_id: &str,
    ) -> Result<Vec<TargetAddress>, AppError> {
        self.list_all(&format!("admin/customers/{}/addresses", customer_id), "addresses")
            .await
    }
}
