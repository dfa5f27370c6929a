//! In-process legacy service API backend.
//!
//! Older targets expose singular `create`/`list` services instead of bulk
//! modules. Their variant service also takes option ids rather than option
//! titles, so the adapter looks the ids up on the freshly created product.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::backends::traits::{BackendKind, TargetBackend};
use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, PriceDef, ProductImagesUpdate,
    TargetAddress, TargetCategory, TargetCustomer, TargetProduct, TargetVariant,
};

// ============================================================================
// Service API
// ============================================================================

/// An option as the legacy product service reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOption {
    pub id: String,
    pub title: String,
}

/// Variant option value addressed by option id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOptionValue {
    pub option_id: String,
    pub value: String,
}

/// Variant input accepted by the legacy variant service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceVariantInput {
    pub title: String,
    pub sku: String,
    pub prices: Vec<PriceDef>,
    pub options: Vec<ServiceOptionValue>,
    pub manage_inventory: bool,
    pub inventory_quantity: Option<i64>,
    pub metadata: JsonValue,
}

/// Legacy catalog services: categories, products, options and variants.
#[async_trait]
pub trait ProductService: Send + Sync {
    async fn list_categories_by_handle(&self, handle: &str)
        -> Result<Vec<TargetCategory>, AppError>;

    async fn create_category(&self, data: NewCategory) -> Result<TargetCategory, AppError>;

    async fn list_products_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Vec<TargetProduct>, AppError>;

    async fn list_products_by_handle(&self, handle: &str) -> Result<Vec<TargetProduct>, AppError>;

    async fn create_product(&self, data: NewProduct) -> Result<TargetProduct, AppError>;

    async fn update_product(
        &self,
        product_id: &str,
        data: ProductImagesUpdate,
    ) -> Result<(), AppError>;

    async fn retrieve_product_options(
        &self,
        product_id: &str,
    ) -> Result<Vec<ServiceOption>, AppError>;

    async fn create_variant(
        &self,
        product_id: &str,
        data: ServiceVariantInput,
    ) -> Result<TargetVariant, AppError>;

    async fn list_variants(&self, product_id: &str) -> Result<Vec<TargetVariant>, AppError>;

    async fn add_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: Vec<String>,
    ) -> Result<(), AppError>;
}

/// Legacy customer services.
#[async_trait]
pub trait CustomerService: Send + Sync {
    async fn list_by_email(&self, email: &str) -> Result<Vec<TargetCustomer>, AppError>;

    async fn create(&self, data: NewCustomer) -> Result<TargetCustomer, AppError>;

    async fn add_address(&self, customer_id: &str, data: NewAddress) -> Result<(), AppError>;

    async fn list_addresses(&self, customer_id: &str) -> Result<Vec<TargetAddress>, AppError>;
}

/// Services resolved from the host process. Any slot may be missing.
#[derive(Clone, Default)]
pub struct ServiceApi {
    pub product: Option<Arc<dyn ProductService>>,
    pub customer: Option<Arc<dyn CustomerService>>,
}

impl ServiceApi {
    /// Registers one object that provides every service.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ProductService + CustomerService + 'static,
    {
        Self {
            product: Some(provider.clone()),
            customer: Some(provider),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// [`TargetBackend`] over the legacy service API.
pub struct ServiceBackend {
    product: Arc<dyn ProductService>,
    customer: Arc<dyn CustomerService>,
}

impl ServiceBackend {
    /// Capability check: both services present and answering.
    pub async fn probe(api: &ServiceApi) -> Result<Self, String> {
        let product = api
            .product
            .clone()
            .ok_or_else(|| "product service not registered".to_string())?;
        let customer = api
            .customer
            .clone()
            .ok_or_else(|| "customer service not registered".to_string())?;

        product
            .list_products_by_handle("__probe__")
            .await
            .map_err(|e| format!("product service list failed: {}", e))?;
        customer
            .list_by_email("probe@invalid")
            .await
            .map_err(|e| format!("customer service list failed: {}", e))?;

        Ok(Self { product, customer })
    }
}

/// Maps `title → value` options onto the service's option ids.
fn to_option_ids(
    options: &BTreeMap<String, String>,
    defined: &[ServiceOption],
) -> Result<Vec<ServiceOptionValue>, AppError> {
    options
        .iter()
        .map(|(title, value)| {
            defined
                .iter()
                .find(|o| o.title.eq_ignore_ascii_case(title))
                .map(|o| ServiceOptionValue {
                    option_id: o.id.clone(),
                    value: value.clone(),
                })
                .ok_or_else(|| {
                    AppError::Validation(format!("product has no option titled '{}'", title))
                })
        })
        .collect()
}

#[async_trait]
impl TargetBackend for ServiceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Service
    }

    async fn find_category_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<TargetCategory>, AppError> {
        let found = self.product.list_categories_by_handle(handle).await?;
        Ok(found.into_iter().find(|c| c.handle == handle))
    }

    async fn create_categories(
        &self,
        categories: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError> {
        let mut created = Vec::with_capacity(categories.len());
        for category in categories {
            created.push(self.product.create_category(category).await?);
        }
        Ok(created)
    }

    async fn find_product_by_handle_or_external_id(
        &self,
        handle: &str,
        external_id: &str,
    ) -> Result<Option<TargetProduct>, AppError> {
        let by_external = self.product.list_products_by_external_id(external_id).await?;
        if let Some(product) = by_external
            .into_iter()
            .find(|p| p.external_id.as_deref() == Some(external_id))
        {
            return Ok(Some(product));
        }
        let by_handle = self.product.list_products_by_handle(handle).await?;
        Ok(by_handle.into_iter().find(|p| p.handle == handle))
    }

    async fn create_product(&self, product: &NewProduct) -> Result<TargetProduct, AppError> {
        self.product.create_product(product.clone()).await
    }

    async fn update_product_images(
        &self,
        product_id: &str,
        update: &ProductImagesUpdate,
    ) -> Result<(), AppError> {
        self.product.update_product(product_id, update.clone()).await
    }

    async fn create_variant(
        &self,
        product_id: &str,
        variant: &NewVariant,
    ) -> Result<TargetVariant, AppError> {
        let defined = self.product.retrieve_product_options(product_id).await?;
        let input = ServiceVariantInput {
            title: variant.title.clone(),
            sku: variant.sku.clone(),
            prices: variant.prices.clone(),
            options: to_option_ids(&variant.options, &defined)?,
            manage_inventory: variant.manage_inventory,
            inventory_quantity: variant.inventory_quantity,
            metadata: variant.metadata.clone(),
        };
        self.product.create_variant(product_id, input).await
    }

    async fn list_product_variants(
        &self,
        product_id: &str,
    ) -> Result<Vec<TargetVariant>, AppError> {
        self.product.list_variants(product_id).await
    }

    async fn link_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError> {
        self.product
            .add_to_sales_channel(sales_channel_id, product_ids.to_vec())
            .await
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<TargetCustomer>, AppError> {
        let found = self.customer.list_by_email(email).await?;
        Ok(found
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email)))
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<TargetCustomer, AppError> {
        self.customer.create(customer.clone()).await
    }

    async fn create_customer_address(
        &self,
        customer_id: &str,
        address: &NewAddress,
    ) -> Result<(), AppError> {
        self.customer.add_address(customer_id, address.clone()).await
    }

    async fn list_customer_addresses(
        &self,
        customer_id: &str,
    ) -> Result<Vec<TargetAddress>, AppError> {
        self.customer.list_addresses(customer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: &str, title: &str) -> ServiceOption {
        ServiceOption {
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    #[test]
    fn test_option_titles_resolve_to_ids() {
        let defined = vec![option("opt_1", "Color"), option("opt_2", "Size")];
        let mut options = BTreeMap::new();
        options.insert("size".to_string(), "M".to_string());
        options.insert("Color".to_string(), "Red".to_string());

        let resolved = to_option_ids(&options, &defined).unwrap();
        assert_eq!(
            resolved,
            vec![
                ServiceOptionValue {
                    option_id: "opt_1".into(),
                    value: "Red".into()
                },
                ServiceOptionValue {
                    option_id: "opt_2".into(),
                    value: "M".into()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_option_title_is_validation_error() {
        let defined = vec![option("opt_1", "Color")];
        let mut options = BTreeMap::new();
        options.insert("Material".to_string(), "Wool".to_string());

        let err = to_option_ids(&options, &defined).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
