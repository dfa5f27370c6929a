//! Product migration.
//!
//! Products run under the bounded scheduler; the writes of one product
//! (create product, create variants, link sales channel) stay sequential.

use std::collections::HashSet;

use crate::backends::TargetBackend;
use crate::concurrency::run_bounded;
use crate::context::MigrationContext;
use crate::error::AppError;
use crate::models::{
    slugify, NewProduct, ProductImagesUpdate, ResourceKind, SourceProduct, TargetProduct,
};
use crate::services::Upserted;

/// Migrates every source product.
///
/// Only the source fetch can fail the whole resource; per-product errors
/// are recorded and the batch moves on.
pub async fn migrate_products(ctx: &MigrationContext) -> Result<(), AppError> {
    let source = ctx.source.clone();
    let products = ctx
        .retry()
        .run("fetch products", || source.products())
        .await?;
    ctx.reporter.touch(ResourceKind::Products);

    let skip_not_visible = ctx.config.source.skip_not_visible;
    let (standalone, hidden): (Vec<_>, Vec<_>) = products
        .into_iter()
        .partition(|p| !(skip_not_visible && p.is_not_visible_individually()));
    tracing::info!(
        products = standalone.len(),
        hidden = hidden.len(),
        "migrating products"
    );
    for product in &hidden {
        ctx.reporter.skipped(
            ResourceKind::Products,
            &product.sku,
            "not visible individually",
        );
    }

    let keys: Vec<String> = standalone.iter().map(|p| p.sku.clone()).collect();
    let outcomes = run_bounded(standalone, ctx.concurrency(), |product| {
        migrate_product(ctx, product)
    })
    .await;

    for outcome in outcomes {
        if let Err(err) = outcome.result {
            ctx.reporter
                .failed(ResourceKind::Products, &keys[outcome.index], &err);
        }
    }
    Ok(())
}

/// Migrates one product and its variants.
pub async fn migrate_product(
    ctx: &MigrationContext,
    product: SourceProduct,
) -> Result<(), AppError> {
    let retry = ctx.retry();
    let backend = &ctx.backend;

    let children = if product.product_type.has_children() {
        let source = &ctx.source;
        retry
            .run(&format!("fetch children of {}", product.sku), || {
                source.children(&product)
            })
            .await?
    } else {
        Vec::new()
    };

    let mut draft = ctx.variants.build(&product, &children);
    for warning in &draft.warnings {
        ctx.reporter
            .warning(ResourceKind::Products, &product.sku, warning.as_str());
    }

    let media = ctx.media.migrate(&product.media).await;
    for (path, reason) in &media.skipped {
        ctx.reporter.warning(
            ResourceKind::Products,
            &product.sku,
            format!("image {} skipped: {}", path, reason),
        );
    }
    draft.product.images = media.images;
    draft.product.thumbnail = media.thumbnail;
    draft.product.category_ids = target_categories(ctx, &product);

    let new_product = disambiguate(ctx, draft.product).await?;
    let (new_product, upserted) = upsert_product(ctx, new_product).await?;
    let handle = new_product.handle.clone();

    let created = upserted.is_created();
    let target = upserted.into_inner();
    ctx.mappings
        .insert(ResourceKind::Products, product.entity_id, &target.id);

    let existing_skus: HashSet<String> = if created {
        HashSet::new()
    } else {
        let update = ProductImagesUpdate {
            images: new_product.images.clone(),
            thumbnail: new_product.thumbnail.clone(),
            metadata: new_product.metadata.clone(),
        };
        retry
            .run(&format!("update {}", handle), || {
                backend.update_product_images(&target.id, &update)
            })
            .await?;
        retry
            .run(&format!("list variants of {}", handle), || {
                backend.list_product_variants(&target.id)
            })
            .await?
            .into_iter()
            .filter_map(|v| v.sku)
            .collect()
    };

    for variant in draft
        .variants
        .iter()
        .filter(|v| !existing_skus.contains(&v.sku))
    {
        let created_variant = retry
            .run(&format!("create variant {}", variant.sku), || {
                backend.create_variant(&target.id, variant)
            })
            .await?;
        tracing::debug!(
            product = %handle,
            sku = %variant.sku,
            variant_id = %created_variant.id,
            "created variant"
        );
    }

    if let Some(channel) = &ctx.config.target.sales_channel_id {
        let ids = vec![target.id.clone()];
        retry
            .run(&format!("link {} to sales channel", handle), || {
                backend.link_products_to_sales_channel(channel, &ids)
            })
            .await?;
    }

    if created {
        ctx.reporter
            .created(ResourceKind::Products, &handle, &target.id);
    } else {
        ctx.reporter
            .updated(ResourceKind::Products, &handle, &target.id);
    }
    Ok(())
}

/// Target ids of the product's categories; unmigrated ones are dropped.
fn target_categories(ctx: &MigrationContext, product: &SourceProduct) -> Vec<String> {
    let mut ids = Vec::new();
    for source_id in &product.category_ids {
        match ctx.mappings.get(ResourceKind::Categories, *source_id) {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => {
                tracing::debug!(sku = %product.sku, category = source_id, "category not migrated")
            }
        }
    }
    ids
}

/// Gives the product a SKU-scoped handle when its handle already belongs
/// to a product with another external id.
async fn disambiguate(
    ctx: &MigrationContext,
    mut product: NewProduct,
) -> Result<NewProduct, AppError> {
    let backend = &ctx.backend;
    let found: Option<TargetProduct> = ctx
        .resolver
        .resolve(&format!("product:{}", product.external_id), || {
            backend.find_product_by_handle_or_external_id(&product.handle, &product.external_id)
        })
        .await?;

    if found.is_some_and(|found| !owned_by(&found, &product.external_id)) {
        let scoped = scoped_handle(&product);
        tracing::debug!(
            handle = %product.handle,
            scoped = %scoped,
            "handle taken by another product"
        );
        product.handle = scoped;
    }
    Ok(product)
}

/// Finds or creates the product under its external id.
///
/// Products of different external ids can race for one handle. The loser's
/// create conflicts and its lookup finds nothing it owns, so the create is
/// repeated once under the SKU-scoped handle.
async fn upsert_product(
    ctx: &MigrationContext,
    mut product: NewProduct,
) -> Result<(NewProduct, Upserted<TargetProduct>), AppError> {
    match upsert_once(ctx, &product).await {
        Err(err) if err.is_conflict() => {
            let scoped = scoped_handle(&product);
            if scoped == product.handle {
                return Err(err);
            }
            tracing::debug!(
                handle = %product.handle,
                scoped = %scoped,
                error = %err,
                "handle claimed concurrently, retrying scoped"
            );
            product.handle = scoped;
            let upserted = upsert_once(ctx, &product).await?;
            Ok((product, upserted))
        }
        result => result.map(|upserted| (product, upserted)),
    }
}

async fn upsert_once(
    ctx: &MigrationContext,
    product: &NewProduct,
) -> Result<Upserted<TargetProduct>, AppError> {
    let backend = ctx.backend.as_ref();
    ctx.resolver
        .upsert(
            &format!("product:{}", product.external_id),
            || find_owned(backend, product),
            || backend.create_product(product),
        )
        .await
}

/// Product lookup that ignores matches owned by another external id.
async fn find_owned(
    backend: &dyn TargetBackend,
    product: &NewProduct,
) -> Result<Option<TargetProduct>, AppError> {
    let found = backend
        .find_product_by_handle_or_external_id(&product.handle, &product.external_id)
        .await?;
    Ok(found.filter(|found| owned_by(found, &product.external_id)))
}

fn owned_by(found: &TargetProduct, external_id: &str) -> bool {
    found
        .external_id
        .as_deref()
        .map_or(true, |id| id == external_id)
}

fn scoped_handle(product: &NewProduct) -> String {
    let suffix = format!("-{}", slugify(&product.external_id));
    if product.handle.ends_with(&suffix) {
        product.handle.clone()
    } else {
        format!("{}{}", product.handle, suffix)
    }
}
