//! Dry-run wrapper around a selected backend.
//!
//! Lookups go to the real backend so the run reports what would be reused;
//! writes are logged and answered with synthetic ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::traits::{BackendKind, TargetBackend};
use crate::error::AppError;
use crate::models::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, ProductImagesUpdate,
    TargetAddress, TargetCategory, TargetCustomer, TargetProduct, TargetVariant,
};

pub struct DryRunBackend {
    inner: Arc<dyn TargetBackend>,
    counter: AtomicU64,
}

impl DryRunBackend {
    pub fn new(inner: Arc<dyn TargetBackend>) -> Self {
        Self {
            inner,
            counter: AtomicU64::new(0),
        }
    }

    fn synthetic_id(&self, resource: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("dry_{}_{}", resource, n)
    }

    fn is_synthetic(id: &str) -> bool {
        id.starts_with("dry_")
    }
}

#[async_trait]
impl TargetBackend for DryRunBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn find_category_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<TargetCategory>, AppError> {
        self.inner.find_category_by_handle(handle).await
    }

    async fn create_categories(
        &self,
        categories: Vec<NewCategory>,
    ) -> Result<Vec<TargetCategory>, AppError> {
        Ok(categories
            .into_iter()
            .map(|c| {
                tracing::info!(
                    handle = %c.handle,
                    parent = ?c.parent_category_id,
                    "[dry-run] create category"
                );
                TargetCategory {
                    id: self.synthetic_id("category"),
                    handle: c.handle,
                    name: c.name,
                    parent_category_id: c.parent_category_id,
                }
            })
            .collect())
    }

    async fn find_product_by_handle_or_external_id(
        &self,
        handle: &str,
        external_id: &str,
    ) -> Result<Option<TargetProduct>, AppError> {
        self.inner
            .find_product_by_handle_or_external_id(handle, external_id)
            .await
    }

    async fn create_product(&self, product: &NewProduct) -> Result<TargetProduct, AppError> {
        tracing::info!(
            handle = %product.handle,
            external_id = %product.external_id,
            options = product.options.len(),
            "[dry-run] create product"
        );
        Ok(TargetProduct {
            id: self.synthetic_id("product"),
            handle: product.handle.clone(),
            external_id: Some(product.external_id.clone()),
            title: product.title.clone(),
        })
    }

    async fn update_product_images(
        &self,
        product_id: &str,
        update: &ProductImagesUpdate,
    ) -> Result<(), AppError> {
        tracing::info!(
            product_id,
            images = update.images.len(),
            "[dry-run] update product images"
        );
        Ok(())
    }

    async fn create_variant(
        &self,
        product_id: &str,
        variant: &NewVariant,
    ) -> Result<TargetVariant, AppError> {
        tracing::info!(product_id, sku = %variant.sku, "[dry-run] create variant");
        Ok(TargetVariant {
            id: self.synthetic_id("variant"),
            sku: Some(variant.sku.clone()),
            title: variant.title.clone(),
        })
    }

    async fn list_product_variants(
        &self,
        product_id: &str,
    ) -> Result<Vec<TargetVariant>, AppError> {
        if Self::is_synthetic(product_id) {
            return Ok(Vec::new());
        }
        self.inner.list_product_variants(product_id).await
    }

    async fn link_products_to_sales_channel(
        &self,
        sales_channel_id: &str,
        product_ids: &[String],
    ) -> Result<(), AppError> {
        tracing::info!(
            sales_channel_id,
            products = product_ids.len(),
            "[dry-run] link sales channel"
        );
        Ok(())
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<TargetCustomer>, AppError> {
        self.inner.find_customer_by_email(email).await
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<TargetCustomer, AppError> {
        tracing::info!(email = %customer.email, "[dry-run] create customer");
        Ok(TargetCustomer {
            id: self.synthetic_id("customer"),
            email: customer.email.clone(),
        })
    }

    async fn create_customer_address(
        &self,
        customer_id: &str,
        address: &NewAddress,
    ) -> Result<(), AppError> {
        tracing::info!(customer_id, city = ?address.city, "[dry-run] create address");
        Ok(())
    }

    async fn list_customer_addresses(
        &self,
        customer_id: &str,
    ) -> Result<Vec<TargetAddress>, AppError> {
        if Self::is_synthetic(customer_id) {
            return Ok(Vec::new());
        }
        self.inner.list_customer_addresses(customer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryCatalog;
    use crate::backends::module::ModuleBackend;
    use crate::models::ProductStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let inner = ModuleBackend::probe(&catalog.module_api()).await.unwrap();
        let backend = DryRunBackend::new(Arc::new(inner));

        let product = backend
            .create_product(&NewProduct {
                title: "Tee".into(),
                handle: "tee".into(),
                external_id: "1".into(),
                description: None,
                status: ProductStatus::Published,
                options: vec![],
                category_ids: vec![],
                images: vec![],
                thumbnail: None,
                weight: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        let categories = backend
            .create_categories(vec![NewCategory {
                name: "Shoes".into(),
                handle: "shoes".into(),
                parent_category_id: None,
                is_active: true,
                rank: 0,
                description: None,
                metadata: json!({}),
            }])
            .await
            .unwrap();

        assert_eq!(product.id, "dry_product_1");
        assert_eq!(categories[0].id, "dry_category_2");
        assert!(backend.list_product_variants(&product.id).await.unwrap().is_empty());
        assert!(catalog.products().is_empty());
        assert!(catalog.categories().is_empty());
        assert_eq!(catalog.calls("create_product"), 0);
    }

    #[tokio::test]
    async fn test_dry_run_forwards_lookups() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.seed_category("shoes", "Shoes");
        let inner = ModuleBackend::probe(&catalog.module_api()).await.unwrap();
        let backend = DryRunBackend::new(Arc::new(inner));

        let found = backend.find_category_by_handle("shoes").await.unwrap();
        assert_eq!(found.map(|c| c.name), Some("Shoes".to_string()));
    }
}
