//! The uniform write adapter every target backend implements.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, ProductImagesUpdate,
    TargetAddress, TargetCategory, TargetCustomer, TargetProduct, TargetVariant,
};

/// Which write path a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process module API with bulk create/list calls.
    Module,
    /// In-process legacy service API with singular calls.
    Service,
    /// Remote HTTP admin API.
    Http,
}

impl BackendKind {
    /// Probe order.
    pub const PRIORITY: [BackendKind; 3] =
        [BackendKind::Module, BackendKind::Service, BackendKind::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Module => "module",
            BackendKind::Service => "service",
            BackendKind::Http => "http",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write adapter consumed by every migrator.
///
/// Each backend hides its own request shapes behind this method set, so call
/// sites never branch on which backend is active. Implementations do not
/// retry; callers wrap each call in the run's
/// [`RetryPolicy`](crate::concurrency::RetryPolicy).
#[async_trait]
pub trait TargetBackend: Send + Sync {
    /// The write path this adapter uses.
    fn kind(&self) -> BackendKind;

    /// Looks up a category by its unique handle.
    async fn find_category_by_handle(&self, handle: &str)
        -> Result<Option<TargetCategory>, AppError>;

    /// Creates categories, returning them in input order.
    async fn create_categories(
        &self,
        categories: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError>;

    /// Looks up a product by external id first, then by handle.
    async fn find_product_by_handle_or_external_id(
        &self,
        handle: &str,
        external_id: &str,
    ) -> Result<Option<TargetProduct>, AppError>;

    /// Creates a product without variants.
    async fn create_product(&self, product: &NewProduct) -> Result<TargetProduct, AppError>;

    /// Refreshes images, thumbnail and metadata of an existing product.
    async fn update_product_images(
        &self,
        product_id: &str,
        update: &ProductImagesUpdate,
    ) -> Result<(), AppError>;

    /// Creates one variant under a product.
    async fn create_variant(
        &self,
        product_id: &str,
        variant: &NewVariant,
    ) -> Result<TargetVariant, AppError>;

    /// Lists the variants of a product.
    async fn list_product_variants(&self, product_id: &str)
        -> Result<Vec<TargetVariant>, AppError>;

    /// Makes products purchasable through a sales channel.
    async fn link_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError>;

    /// Looks up a customer by (lower-cased) email.
    async fn find_customer_by_email(&self, email: &str)
        -> Result<Option<TargetCustomer>, AppError>;

    async fn create_customer(&self, customer: &NewCustomer) -> Result<TargetCustomer, AppError>;

    async fn create_customer_address(
        &self,
        customer_id: &str,
        address: &NewAddress,
    ) -> Result<(), AppError>;

    /// Lists the addresses stored on a customer.
    async fn list_customer_addresses(&self, customer_id: &str)
        -> Result<Vec<TargetAddress>, AppError>;
}
