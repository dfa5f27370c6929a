//! Resource migrator registry and run orchestration.
//!
//! Migrators are registered in dependency order (categories before the
//! products that reference them) and always run in that order, whatever
//! order the resources were requested in.

use futures::future::BoxFuture;

use crate::context::MigrationContext;
use crate::error::AppError;
use crate::models::ResourceKind;
use crate::services::{
    migrate_customers, migrate_products, CategoryState, CategoryTreeMigrator, MigrationSummary,
};

// =============================================================================
// Migrator Trait
// =============================================================================

/// One resource kind's migration step.
/// Uses BoxFuture so the future may borrow the context.
pub trait ResourceMigrator: Send + Sync {
    fn resource(&self) -> ResourceKind;
    fn description(&self) -> &'static str;
    fn run<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Result<(), AppError>>;
}

pub struct CategoriesMigrator;

impl ResourceMigrator for CategoriesMigrator {
    fn resource(&self) -> ResourceKind {
        ResourceKind::Categories
    }

    fn description(&self) -> &'static str {
        "category tree in parent-first order"
    }

    fn run<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let states = CategoryTreeMigrator::new(ctx).run().await?;
            let failed = states
                .values()
                .filter(|s| **s == CategoryState::Failed)
                .count();
            tracing::debug!(categories = states.len(), failed, "category tree done");
            Ok(())
        })
    }
}

pub struct ProductsMigrator;

impl ResourceMigrator for ProductsMigrator {
    fn resource(&self) -> ResourceKind {
        ResourceKind::Products
    }

    fn description(&self) -> &'static str {
        "products with options, variants and images"
    }

    fn run<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(migrate_products(ctx))
    }
}

pub struct CustomersMigrator;

impl ResourceMigrator for CustomersMigrator {
    fn resource(&self) -> ResourceKind {
        ResourceKind::Customers
    }

    fn description(&self) -> &'static str {
        "customers with address books"
    }

    fn run<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(migrate_customers(ctx))
    }
}

// =============================================================================
// Migrator Registry
// =============================================================================

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunResult {
    pub summary: MigrationSummary,
    /// Resources whose migrator failed outright, with the error.
    pub errors: Vec<(ResourceKind, String)>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Register {
    migrators: Vec<Box<dyn ResourceMigrator>>,
}

impl Register {
    pub fn new() -> Self {
        Self {
            migrators: Vec::new(),
        }
    }

    pub fn register(mut self, migrator: impl ResourceMigrator + 'static) -> Self {
        self.migrators.push(Box::new(migrator));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ResourceMigrator> {
        self.migrators.iter().map(|m| m.as_ref())
    }

    /// Runs the registered migrators whose resource is in `resources`.
    ///
    /// A migrator that fails does not stop the ones after it. State is saved
    /// after every migrator.
    pub async fn run_selected(
        &self,
        ctx: &MigrationContext,
        resources: &[ResourceKind],
    ) -> RunResult {
        let mut errors = Vec::new();

        for migrator in self.iter() {
            let resource = migrator.resource();
            if !resources.contains(&resource) {
                continue;
            }

            tracing::info!("Migrating {}: {}", resource, migrator.description());
            if let Err(e) = migrator.run(ctx).await {
                tracing::error!("Migration of {} failed: {}", resource, e);
                errors.push((resource, e.to_string()));
            }

            if let Err(e) = ctx.save_state().await {
                tracing::error!("Saving state after {} failed: {}", resource, e);
                errors.push((resource, e.to_string()));
            }
        }

        RunResult {
            summary: ctx.reporter.summary(),
            errors,
        }
    }
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry in run order.
pub fn create_register() -> Register {
    Register::new()
        .register(CategoriesMigrator)
        .register(ProductsMigrator)
        .register(CustomersMigrator)
}

/// Runs the requested resources against `ctx`.
pub async fn run_migration(ctx: &MigrationContext, resources: &[ResourceKind]) -> RunResult {
    create_register().run_selected(ctx, resources).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_order_matches_resource_order() {
        let register = create_register();
        let order: Vec<ResourceKind> = register.iter().map(|m| m.resource()).collect();
        assert_eq!(order, ResourceKind::ALL.to_vec());
    }
}
