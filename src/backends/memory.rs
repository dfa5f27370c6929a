//! In-memory target catalog.
//!
//! Implements both in-process tiers (module and legacy service) over one
//! shared store, enforcing the target's uniqueness rules: category and
//! product handles, product external ids, variant SKUs and customer emails.
//! Used for end-to-end runs without a live target and for tests, with
//! per-operation call counters, failure injection and optional latency.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::backends::module::{
    CustomerModule, ListFilter, ModuleApi, ProductModule, SalesChannelModule,
};
use crate::backends::service::{
    CustomerService, ProductService, ServiceApi, ServiceOption, ServiceVariantInput,
};
use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, OptionDef, PriceDef,
    ProductImagesUpdate, TargetAddress, TargetCategory, TargetCustomer, TargetProduct,
    TargetVariant,
};

// ============================================================================
// Stored records
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCategory {
    pub category: TargetCategory,
    pub is_active: bool,
    pub rank: i64,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProduct {
    pub product: TargetProduct,
    pub options: Vec<OptionDef>,
    pub option_ids: Vec<String>,
    pub category_ids: Vec<String>,
    pub images: Vec<String>,
    pub thumbnail: Option<String>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVariant {
    pub product_id: String,
    pub variant: TargetVariant,
    pub options: BTreeMap<String, String>,
    pub prices: Vec<PriceDef>,
    pub inventory_quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCustomer {
    pub customer: TargetCustomer,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub addresses: Vec<NewAddress>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    categories: Vec<StoredCategory>,
    products: Vec<StoredProduct>,
    variants: Vec<StoredVariant>,
    channels: BTreeMap<String, BTreeSet<String>>,
    customers: Vec<StoredCustomer>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, VecDeque<u16>>,
    late_failures: HashMap<String, VecDeque<u16>>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{:04}", prefix, self.next_id)
    }

    fn product(&self, product_id: &str) -> Result<&StoredProduct, AppError> {
        self.products
            .iter()
            .find(|p| p.product.id == product_id)
            .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))
    }
}

fn duplicate(what: &str, key: &str) -> AppError {
    AppError::Validation(format!("{} with {} already exists", what, key))
}

fn injected_failure(operation: &str, status: Option<u16>) -> Result<(), AppError> {
    match status {
        Some(status) => Err(AppError::Http {
            status,
            url: format!("memory://{}", operation),
            body: format!("injected {} failure", status),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Shared in-memory target store.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every write by `latency`, widening race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Exposes the catalog as the module tier.
    pub fn module_api(self: &Arc<Self>) -> ModuleApi {
        ModuleApi::from_provider(self.clone())
    }

    /// Exposes the catalog as the legacy service tier.
    pub fn service_api(self: &Arc<Self>) -> ServiceApi {
        ServiceApi::from_provider(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other assertion.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next `times` calls of `operation` fail with HTTP `status`.
    pub fn fail_next(&self, operation: &str, status: u16, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(status).take(times));
    }

    /// Makes the next `times` calls of `operation` apply their write and
    /// then fail with HTTP `status`, as when the response is lost.
    pub fn fail_after_write(&self, operation: &str, status: u16, times: usize) {
        let mut state = self.lock();
        let queue = state.late_failures.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(status).take(times));
    }

    /// Number of times `operation` was called, including failed calls.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn categories(&self) -> Vec<StoredCategory> {
        self.lock().categories.clone()
    }

    pub fn products(&self) -> Vec<StoredProduct> {
        self.lock().products.clone()
    }

    pub fn variants_of(&self, product_id: &str) -> Vec<StoredVariant> {
        self.lock()
            .variants
            .iter()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn customers(&self) -> Vec<StoredCustomer> {
        self.lock().customers.clone()
    }

    pub fn channel_products(&self, sales_channel_id: &str) -> BTreeSet<String> {
        self.lock()
            .channels
            .get(sales_channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Seeds a category as if created by an earlier run.
    pub fn seed_category(&self, handle: &str, name: &str) -> TargetCategory {
        let mut state = self.lock();
        let category = TargetCategory {
            id: state.id("pcat"),
            handle: handle.to_string(),
            name: name.to_string(),
            parent_category_id: None,
        };
        state.categories.push(StoredCategory {
            category: category.clone(),
            is_active: true,
            rank: 0,
            metadata: JsonValue::Null,
        });
        category
    }

    /// Counts the call and pops an injected failure, if any.
    fn enter(&self, operation: &str) -> Result<(), AppError> {
        let mut state = self.lock();
        *state.calls.entry(operation.to_string()).or_default() += 1;
        let injected = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        injected_failure(operation, injected)
    }

    /// Pops a failure queued to fire after the write has been applied.
    fn leave(&self, operation: &str) -> Result<(), AppError> {
        let injected = self
            .lock()
            .late_failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        injected_failure(operation, injected)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    // ------------------------------------------------------------------------
    // Shared operations
    // ------------------------------------------------------------------------

    fn list_categories(&self, filter: &ListFilter) -> Vec<TargetCategory> {
        let state = self.lock();
        let matches = state
            .categories
            .iter()
            .filter(|c| filter.handle.as_ref().map_or(true, |h| &c.category.handle == h))
            .map(|c| c.category.clone());
        match filter.take {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        }
    }

    fn insert_category(&self, data: NewCategory) -> Result<TargetCategory, AppError> {
        let mut state = self.lock();
        if state.categories.iter().any(|c| c.category.handle == data.handle) {
            return Err(duplicate("Product category", &format!("handle: {}", data.handle)));
        }
        if let Some(parent) = &data.parent_category_id {
            if !state.categories.iter().any(|c| &c.category.id == parent) {
                return Err(AppError::Validation(format!(
                    "parent category {} does not exist",
                    parent
                )));
            }
        }
        let category = TargetCategory {
            id: state.id("pcat"),
            handle: data.handle,
            name: data.name,
            parent_category_id: data.parent_category_id,
        };
        state.categories.push(StoredCategory {
            category: category.clone(),
            is_active: data.is_active,
            rank: data.rank,
            metadata: data.metadata,
        });
        Ok(category)
    }

    fn list_products_matching(&self, filter: &ListFilter) -> Vec<TargetProduct> {
        let state = self.lock();
        let matches = state
            .products
            .iter()
            .filter(|p| filter.handle.as_ref().map_or(true, |h| &p.product.handle == h))
            .filter(|p| {
                filter
                    .external_id
                    .as_ref()
                    .map_or(true, |e| p.product.external_id.as_ref() == Some(e))
            })
            .map(|p| p.product.clone());
        match filter.take {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        }
    }

    fn insert_product(&self, data: NewProduct) -> Result<TargetProduct, AppError> {
        if data.title.trim().is_empty() {
            return Err(AppError::Validation("product title is required".into()));
        }
        let mut state = self.lock();
        if state.products.iter().any(|p| p.product.handle == data.handle) {
            return Err(duplicate("Product", &format!("handle: {}", data.handle)));
        }
        if state
            .products
            .iter()
            .any(|p| p.product.external_id.as_deref() == Some(data.external_id.as_str()))
        {
            return Err(duplicate("Product", &format!("external_id: {}", data.external_id)));
        }
        for id in &data.category_ids {
            if !state.categories.iter().any(|c| &c.category.id == id) {
                return Err(AppError::Validation(format!("category {} does not exist", id)));
            }
        }

        let id = state.id("prod");
        let option_ids = (0..data.options.len())
            .map(|i| format!("{}_opt_{}", id, i))
            .collect();
        let product = TargetProduct {
            id,
            handle: data.handle,
            external_id: Some(data.external_id),
            title: data.title,
        };
        state.products.push(StoredProduct {
            product: product.clone(),
            options: data.options,
            option_ids,
            category_ids: data.category_ids,
            images: data.images,
            thumbnail: data.thumbnail,
            metadata: data.metadata,
        });
        Ok(product)
    }

    fn apply_update(&self, product_id: &str, data: &ProductImagesUpdate) -> Result<(), AppError> {
        let mut state = self.lock();
        let product = state
            .products
            .iter_mut()
            .find(|p| p.product.id == product_id)
            .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))?;
        product.images = data.images.clone();
        product.thumbnail = data.thumbnail.clone();
        product.metadata = data.metadata.clone();
        Ok(())
    }

    fn insert_variant(
        &self,
        product_id: &str,
        title: String,
        sku: String,
        options: BTreeMap<String, String>,
        prices: Vec<PriceDef>,
        inventory_quantity: Option<i64>,
    ) -> Result<TargetVariant, AppError> {
        let mut state = self.lock();
        let product = state.product(product_id)?;

        let expected: BTreeSet<&str> = product.options.iter().map(|o| o.title.as_str()).collect();
        let given: BTreeSet<&str> = options.keys().map(String::as_str).collect();
        if expected != given {
            return Err(AppError::Validation(format!(
                "variant {} must set exactly the options {:?}, got {:?}",
                sku, expected, given
            )));
        }
        for option in &product.options {
            let value = options.get(&option.title).map(String::as_str).unwrap_or("");
            if !option.values.iter().any(|v| v == value) {
                return Err(AppError::Validation(format!(
                    "value '{}' is not defined for option '{}'",
                    value, option.title
                )));
            }
        }
        if state
            .variants
            .iter()
            .any(|v| v.variant.sku.as_deref() == Some(sku.as_str()))
        {
            return Err(duplicate("Product variant", &format!("sku: {}", sku)));
        }

        let variant = TargetVariant {
            id: state.id("variant"),
            sku: Some(sku),
            title,
        };
        state.variants.push(StoredVariant {
            product_id: product_id.to_string(),
            variant: variant.clone(),
            options,
            prices,
            inventory_quantity,
        });
        Ok(variant)
    }

    fn variants_for(&self, product_id: &str) -> Vec<TargetVariant> {
        self.variants_of(product_id)
            .into_iter()
            .map(|v| v.variant)
            .collect()
    }

    fn link(&self, sales_channel_id: &str, product_ids: &[String]) -> Result<(), AppError> {
        let mut state = self.lock();
        for id in product_ids {
            state.product(id)?;
        }
        state
            .channels
            .entry(sales_channel_id.to_string())
            .or_default()
            .extend(product_ids.iter().cloned());
        Ok(())
    }

    fn customers_matching(&self, email: Option<&str>, take: Option<usize>) -> Vec<TargetCustomer> {
        let state = self.lock();
        let matches = state
            .customers
            .iter()
            .filter(|c| email.map_or(true, |e| c.customer.email.eq_ignore_ascii_case(e)))
            .map(|c| c.customer.clone());
        match take {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        }
    }

    fn insert_customer(&self, data: NewCustomer) -> Result<TargetCustomer, AppError> {
        let email = data.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::Validation("customer email is required".into()));
        }
        let mut state = self.lock();
        if state.customers.iter().any(|c| c.customer.email == email) {
            return Err(duplicate("Customer", &format!("email: {}", email)));
        }
        let customer = TargetCustomer {
            id: state.id("cus"),
            email,
        };
        state.customers.push(StoredCustomer {
            customer: customer.clone(),
            first_name: data.first_name,
            last_name: data.last_name,
            addresses: Vec::new(),
        });
        Ok(customer)
    }

    fn insert_address(&self, customer_id: &str, data: NewAddress) -> Result<(), AppError> {
        let mut state = self.lock();
        let customer = state
            .customers
            .iter_mut()
            .find(|c| c.customer.id == customer_id)
            .ok_or_else(|| AppError::NotFound(format!("customer {}", customer_id)))?;
        customer.addresses.push(data);
        Ok(())
    }

    fn addresses_of(&self, customer_id: &str) -> Result<Vec<TargetAddress>, AppError> {
        let state = self.lock();
        let customer = state
            .customers
            .iter()
            .find(|c| c.customer.id == customer_id)
            .ok_or_else(|| AppError::NotFound(format!("customer {}", customer_id)))?;
        Ok(customer
            .addresses
            .iter()
            .enumerate()
            .map(|(i, a)| TargetAddress {
                id: format!("{}_addr_{}", customer_id, i + 1),
                address_1: a.address_1.clone(),
                city: a.city.clone(),
                postal_code: a.postal_code.clone(),
                country_code: a.country_code.clone(),
            })
            .collect())
    }
}

// ============================================================================
// Module tier
// ============================================================================

#[async_trait]
impl ProductModule for InMemoryCatalog {
    async fn list_product_categories(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<TargetCategory>, AppError> {
        self.enter("list_categories")?;
        Ok(self.list_categories(filter))
    }

    async fn create_product_categories(
        &self,
        data: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError> {
        self.enter("create_category")?;
        self.pause().await;
        let created = data
            .into_iter()
            .map(|c| self.insert_category(c))
            .collect::<Result<Vec<_>, _>>()?;
        self.leave("create_category")?;
        Ok(created)
    }

    async fn list_products(&self, filter: &ListFilter) -> Result<Vec<TargetProduct>, AppError> {
        self.enter("list_products")?;
        Ok(self.list_products_matching(filter))
    }

    async fn create_products(
        &self,
        data: Vec<NewProduct>,
    ) -> Result<Vec<TargetProduct>, AppError> {
        self.enter("create_product")?;
        self.pause().await;
        data.into_iter().map(|p| self.insert_product(p)).collect()
    }

    async fn update_products(
        &self,
        product_id: &str,
        data: &ProductImagesUpdate,
    ) -> Result<(), AppError> {
        self.enter("update_product")?;
        self.apply_update(product_id, data)
    }

    async fn create_product_variants(
        &self,
        data: Vec<(String, NewVariant)>,
    ) -> Result<Vec<TargetVariant>, AppError> {
        self.enter("create_variant")?;
        self.pause().await;
        data.into_iter()
            .map(|(product_id, v)| {
                self.insert_variant(
                    &product_id,
                    v.title,
                    v.sku,
                    v.options,
                    v.prices,
                    v.inventory_quantity,
                )
            })
            .collect()
    }

    async fn list_product_variants(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<TargetVariant>, AppError> {
        self.enter("list_variants")?;
        let product_id = filter
            .product_id
            .as_deref()
            .ok_or_else(|| AppError::Validation("product_id filter is required".into()))?;
        Ok(self.variants_for(product_id))
    }
}

#[async_trait]
impl SalesChannelModule for InMemoryCatalog {
    async fn add_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError> {
        self.enter("link_sales_channel")?;
        self.link(sales_channel_id, product_ids)
    }
}

#[async_trait]
impl CustomerModule for InMemoryCatalog {
    async fn list_customers(&self, filter: &ListFilter) -> Result<Vec<TargetCustomer>, AppError> {
        self.enter("list_customers")?;
        Ok(self.customers_matching(filter.email.as_deref(), filter.take))
    }

    async fn create_customers(
        &self,
        data: Vec<NewCustomer>,
    ) -> Result<Vec<TargetCustomer>, AppError> {
        self.enter("create_customer")?;
        self.pause().await;
        data.into_iter().map(|c| self.insert_customer(c)).collect()
    }

    async fn create_customer_addresses(
        &self,
        data: Vec<(String, NewAddress)>,
    ) -> Result<(), AppError> {
        self.enter("create_address")?;
        for (customer_id, address) in data {
            self.insert_address(&customer_id, address)?;
        }
        Ok(())
    }

    async fn list_customer_addresses(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<TargetAddress>, AppError> {
        self.enter("list_addresses")?;
        let customer_id = filter
            .customer_id
            .as_deref()
            .ok_or_else(|| AppError::Validation("customer_id filter is required".into()))?;
        self.addresses_of(customer_id)
    }
}

// ============================================================================
// Legacy service tier
// ============================================================================

#[async_trait]
impl ProductService for InMemoryCatalog {
    async fn list_categories_by_handle(
        &self,
        handle: &str,
    ) -> Result<Vec<TargetCategory>, AppError> {
        self.enter("list_categories")?;
        Ok(self.list_categories(&ListFilter::handle(handle)))
    }

    async fn create_category(&self, data: NewCategory) -> Result<TargetCategory, AppError> {
        self.enter("create_category")?;
        self.pause().await;
        let created = self.insert_category(data)?;
        self.leave("create_category")?;
        Ok(created)
    }

    async fn list_products_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Vec<TargetProduct>, AppError> {
        self.enter("list_products")?;
        Ok(self.list_products_matching(&ListFilter::external_id(external_id)))
    }

    async fn list_products_by_handle(&self, handle: &str) -> Result<Vec<TargetProduct>, AppError> {
        self.enter("list_products")?;
        Ok(self.list_products_matching(&ListFilter::handle(handle)))
    }

    async fn create_product(&self, data: NewProduct) -> Result<TargetProduct, AppError> {
        self.enter("create_product")?;
        self.pause().await;
        self.insert_product(data)
    }

    async fn update_product(
        &self,
        product_id: &str,
        data: ProductImagesUpdate,
    ) -> Result<(), AppError> {
        self.enter("update_product")?;
        self.apply_update(product_id, &data)
    }

    async fn retrieve_product_options(
        &self,
        product_id: &str,
    ) -> Result<Vec<ServiceOption>, AppError> {
        self.enter("retrieve_options")?;
        let state = self.lock();
        let product = state.product(product_id)?;
        Ok(product
            .options
            .iter()
            .zip(&product.option_ids)
            .map(|(option, id)| ServiceOption {
                id: id.clone(),
                title: option.title.clone(),
            })
            .collect())
    }

    async fn create_variant(
        &self,
        product_id: &str,
        data: ServiceVariantInput,
    ) -> Result<TargetVariant, AppError> {
        self.enter("create_variant")?;
        self.pause().await;
        let options = {
            let state = self.lock();
            let product = state.product(product_id)?;
            let mut by_title = BTreeMap::new();
            for value in &data.options {
                let idx = product
                    .option_ids
                    .iter()
                    .position(|id| id == &value.option_id)
                    .ok_or_else(|| {
                        AppError::Validation(format!("unknown option id {}", value.option_id))
                    })?;
                by_title.insert(product.options[idx].title.clone(), value.value.clone());
            }
            by_title
        };
        self.insert_variant(
            product_id,
            data.title,
            data.sku,
            options,
            data.prices,
            data.inventory_quantity,
        )
    }

    async fn list_variants(&self, product_id: &str) -> Result<Vec<TargetVariant>, AppError> {
        self.enter("list_variants")?;
        Ok(self.variants_for(product_id))
    }

    async fn add_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: Vec<String>,
    ) -> Result<(), AppError> {
        self.enter("link_sales_channel")?;
        self.link(sales_channel_id, &product_ids)
    }
}

#[async_trait]
impl CustomerService for InMemoryCatalog {
    async fn list_by_email(&self, email: &str) -> Result<Vec<TargetCustomer>, AppError> {
        self.enter("list_customers")?;
        Ok(self.customers_matching(Some(email), Some(1)))
    }

    async fn create(&self, data: NewCustomer) -> Result<TargetCustomer, AppError> {
        self.enter("create_customer")?;
        self.pause().await;
        self.insert_customer(data)
    }

    async fn add_address(&self, customer_id: &str, data: NewAddress) -> Result<(), AppError> {
        self.enter("create_address")?;
        self.insert_address(customer_id, data)
    }

    async fn list_addresses(&self, customer_id: &str) -> Result<Vec<TargetAddress>, AppError> {
        self.enter("list_addresses")?;
        self.addresses_of(customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::module::ModuleBackend;
    use crate::backends::service::ServiceBackend;
    use crate::backends::traits::TargetBackend;
    use crate::models::ProductStatus;
    use serde_json::json;

    fn new_product(handle: &str, external_id: &str, options: Vec<OptionDef>) -> NewProduct {
        NewProduct {
            title: "Tee".into(),
            handle: handle.into(),
            external_id: external_id.into(),
            description: None,
            status: ProductStatus::Published,
            options,
            category_ids: vec![],
            images: vec![],
            thumbnail: None,
            weight: None,
            metadata: json!({}),
        }
    }

    fn new_variant(sku: &str, options: &[(&str, &str)]) -> NewVariant {
        NewVariant {
            title: sku.into(),
            sku: sku.into(),
            prices: vec![],
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            manage_inventory: false,
            inventory_quantity: None,
            metadata: json!({}),
        }
    }

    fn size_option() -> Vec<OptionDef> {
        vec![OptionDef {
            title: "Size".into(),
            values: vec!["S".into(), "M".into()],
        }]
    }

    #[tokio::test]
    async fn test_duplicate_handle_is_conflict() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let backend = ModuleBackend::probe(&catalog.module_api()).await.unwrap();

        backend
            .create_product(&new_product("tee", "1", vec![]))
            .await
            .unwrap();
        let err = backend
            .create_product(&new_product("tee", "2", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_variant_must_cover_every_option() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let backend = ModuleBackend::probe(&catalog.module_api()).await.unwrap();
        let product = backend
            .create_product(&new_product("tee", "1", size_option()))
            .await
            .unwrap();

        let err = backend
            .create_variant(&product.id, &new_variant("TEE-X", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        backend
            .create_variant(&product.id, &new_variant("TEE-S", &[("Size", "S")]))
            .await
            .unwrap();
        assert_eq!(catalog.variants_of(&product.id).len(), 1);
    }

    #[tokio::test]
    async fn test_service_tier_resolves_option_ids() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let backend = ServiceBackend::probe(&catalog.service_api()).await.unwrap();
        let product = backend
            .create_product(&new_product("tee", "1", size_option()))
            .await
            .unwrap();

        backend
            .create_variant(&product.id, &new_variant("TEE-M", &[("Size", "M")]))
            .await
            .unwrap();

        let stored = catalog.variants_of(&product.id);
        assert_eq!(stored[0].options.get("Size").map(String::as_str), Some("M"));
        assert_eq!(catalog.calls("retrieve_options"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_next("list_products", 429, 2);

        let filter = ListFilter::take(1);
        assert!(catalog.list_products(&filter).await.unwrap_err().is_rate_limited());
        assert!(catalog.list_products(&filter).await.unwrap_err().is_rate_limited());
        assert!(catalog.list_products(&filter).await.is_ok());
        assert_eq!(catalog.calls("list_products"), 3);
    }

    #[tokio::test]
    async fn test_late_failure_keeps_the_write() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_after_write("create_category", 500, 1);

        let data = NewCategory {
            name: "Apparel".into(),
            handle: "apparel".into(),
            parent_category_id: None,
            is_active: true,
            rank: 0,
            description: None,
            metadata: json!({}),
        };
        let err = catalog.create_category(data).await.unwrap_err();
        assert!(matches!(err, AppError::Http { status: 500, .. }));
        assert_eq!(catalog.categories().len(), 1);
    }

    #[tokio::test]
    async fn test_customer_email_is_case_insensitive() {
        let catalog = InMemoryCatalog::new();
        CustomerService::create(
            &catalog,
            NewCustomer {
                email: "Ada@Example.com".into(),
                first_name: None,
                last_name: None,
                phone: None,
                metadata: json!({}),
            },
        )
        .await
        .unwrap();

        let found = catalog.list_by_email("ada@example.com").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "ada@example.com");
    }
}
