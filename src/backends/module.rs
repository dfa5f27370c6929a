//! In-process module API backend.
//!
//! The module API is the newest write path: bulk `create_*`/`list_*` calls
//! on product, sales-channel and customer modules resolved from the host
//! process. It is the first tier the selector probes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::traits::{BackendKind, TargetBackend};
use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, ProductImagesUpdate,
    TargetAddress, TargetCategory, TargetCustomer, TargetProduct, TargetVariant,
};

// ============================================================================
// Module API
// ============================================================================

/// Selector for module `list_*` calls. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub handle: Option<String>,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub product_id: Option<String>,
    pub customer_id: Option<String>,
    pub take: Option<usize>,
}

impl ListFilter {
    pub fn handle(handle: &str) -> Self {
        Self {
            handle: Some(handle.to_string()),
            take: Some(1),
            ..Self::default()
        }
    }

    pub fn external_id(external_id: &str) -> Self {
        Self {
            external_id: Some(external_id.to_string()),
            take: Some(1),
            ..Self::default()
        }
    }

    pub fn email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            take: Some(1),
            ..Self::default()
        }
    }

    pub fn product(product_id: &str) -> Self {
        Self {
            product_id: Some(product_id.to_string()),
            ..Self::default()
        }
    }

    pub fn customer(customer_id: &str) -> Self {
        Self {
            customer_id: Some(customer_id.to_string()),
            ..Self::default()
        }
    }

    pub fn take(n: usize) -> Self {
        Self {
            take: Some(n),
            ..Self::default()
        }
    }
}

/// Product module: categories, products and variants.
#[async_trait]
pub trait ProductModule: Send + Sync {
    async fn list_product_categories(&self, filter: &ListFilter)
        -> Result<Vec<TargetCategory>, AppError>;

    async fn create_product_categories(
        &self,
        data: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError>;

    async fn list_products(&self, filter: &ListFilter) -> Result<Vec<TargetProduct>, AppError>;

    async fn create_products(&self, data: Vec<NewProduct>) -> Result<Vec<TargetProduct>, AppError>;

    async fn update_products(
        &self,
        product_id: &str,
        data: &ProductImagesUpdate,
    ) -> Result<(), AppError>;

    /// Creates variants; each entry pairs a product id with its variant.
    async fn create_product_variants(
        &self,
        data: Vec<(String, NewVariant)>,
    ) -> Result<Vec<TargetVariant>, AppError>;

    async fn list_product_variants(&self, filter: &ListFilter)
        -> Result<Vec<TargetVariant>, AppError>;
}

/// Sales channel module.
#[async_trait]
pub trait SalesChannelModule: Send + Sync {
    async fn add_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError>;
}

/// Customer module.
#[async_trait]
pub trait CustomerModule: Send + Sync {
    async fn list_customers(&self, filter: &ListFilter) -> Result<Vec<TargetCustomer>, AppError>;

    async fn create_customers(&self, data: Vec<NewCustomer>)
        -> Result<Vec<TargetCustomer>, AppError>;

    /// Creates addresses; each entry pairs a customer id with its address.
    async fn create_customer_addresses(
        &self,
        data: Vec<(String, NewAddress)>,
    ) -> Result<(), AppError>;

    async fn list_customer_addresses(&self, filter: &ListFilter)
        -> Result<Vec<TargetAddress>, AppError>;
}

/// Modules resolved from the host process. Any slot may be missing.
#[derive(Clone, Default)]
pub struct ModuleApi {
    pub product: Option<Arc<dyn ProductModule>>,
    pub sales_channel: Option<Arc<dyn SalesChannelModule>>,
    pub customer: Option<Arc<dyn CustomerModule>>,
}

impl ModuleApi {
    /// Registers one object that provides every module.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ProductModule + SalesChannelModule + CustomerModule + 'static,
    {
        Self {
            product: Some(provider.clone()),
            sales_channel: Some(provider.clone()),
            customer: Some(provider),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// [`TargetBackend`] over the in-process module API.
pub struct ModuleBackend {
    product: Arc<dyn ProductModule>,
    sales_channel: Arc<dyn SalesChannelModule>,
    customer: Arc<dyn CustomerModule>,
}

impl ModuleBackend {
    /// Capability check: every module must be present and answer a list call.
    pub async fn probe(api: &ModuleApi) -> Result<Self, String> {
        let product = api
            .product
            .clone()
            .ok_or_else(|| "product module not registered".to_string())?;
        let sales_channel = api
            .sales_channel
            .clone()
            .ok_or_else(|| "sales channel module not registered".to_string())?;
        let customer = api
            .customer
            .clone()
            .ok_or_else(|| "customer module not registered".to_string())?;

        product
            .list_product_categories(&ListFilter::take(1))
            .await
            .map_err(|e| format!("list_product_categories failed: {}", e))?;
        product
            .list_products(&ListFilter::take(1))
            .await
            .map_err(|e| format!("list_products failed: {}", e))?;
        customer
            .list_customers(&ListFilter::take(1))
            .await
            .map_err(|e| format!("list_customers failed: {}", e))?;

        Ok(Self {
            product,
            sales_channel,
            customer,
        })
    }
}

fn single<T>(mut items: Vec<T>, what: &str) -> Result<T, AppError> {
    if items.is_empty() {
        return Err(AppError::Internal(format!("{} create returned nothing", what)));
    }
    Ok(items.swap_remove(0))
}

#[async_trait]
impl TargetBackend for ModuleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Module
    }

    async fn find_category_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<TargetCategory>, AppError> {
        let found = self
            .product
            .list_product_categories(&ListFilter::handle(handle))
            .await?;
        Ok(found.into_iter().find(|c| c.handle == handle))
    }

    async fn create_categories(
        &self,
        categories: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError> {
        self.product.create_product_categories(categories).await
    }

    async fn find_product_by_handle_or_external_id(
        &self,
        handle: &str,
        external_id: &str,
    ) -> Result<Option<TargetProduct>, AppError> {
        let by_external = self
            .product
            .list_products(&ListFilter::external_id(external_id))
            .await?;
        if let Some(product) = by_external
            .into_iter()
            .find(|p| p.external_id.as_deref() == Some(external_id))
        {
            return Ok(Some(product));
        }

        let by_handle = self.product.list_products(&ListFilter::handle(handle)).await?;
        Ok(by_handle.into_iter().find(|p| p.handle == handle))
    }

    async fn create_product(&self, product: &NewProduct) -> Result<TargetProduct, AppError> {
        let created = self.product.create_products(vec![product.clone()]).await?;
        single(created, "product")
    }

    async fn update_product_images(
        &self,
        product_id: &str,
        update: &ProductImagesUpdate,
    ) -> Result<(), AppError> {
        self.product.update_products(product_id, update).await
    }

    async fn create_variant(
        &self,
        product_id: &str,
        variant: &NewVariant,
    ) -> Result<TargetVariant, AppError> {
        let created = self
            .product
            .create_product_variants(vec![(product_id.to_string(), variant.clone())])
            .await?;
        single(created, "variant")
    }

    async fn list_product_variants(
        &self,
        product_id: &str,
    ) -> Result<Vec<TargetVariant>, AppError> {
        self.product
            .list_product_variants(&ListFilter::product(product_id))
            .await
    }

    async fn link_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError> {
        self.sales_channel
            .add_products_to_sales_channel(sales_channel_id, product_ids)
            .await
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<TargetCustomer>, AppError> {
        let found = self.customer.list_customers(&ListFilter::email(email)).await?;
        Ok(found
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email)))
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<TargetCustomer, AppError> {
        let created = self.customer.create_customers(vec![customer.clone()]).await?;
        single(created, "customer")
    }

    async fn create_customer_address(
        &self,
        customer_id: &str,
        address: &NewAddress,
    ) -> Result<(), AppError> {
        self.customer
            .create_customer_addresses(vec![(customer_id.to_string(), address.clone())])
            .await
    }

    async fn list_customer_addresses(
        &self,
        customer_id: &str,
    ) -> Result<Vec<TargetAddress>, AppError> {
        self.customer
            .list_customer_addresses(&ListFilter::customer(customer_id))
            .await
    }
}
