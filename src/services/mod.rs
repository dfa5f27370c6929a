//! Migration services.
//!
//! Services hold the per-resource business rules and talk to the target
//! only through [`crate::backends::TargetBackend`] and the run's
//! [`crate::context::MigrationContext`].

mod categories;
mod customers;
mod media;
mod products;
mod reporter;
mod resolver;
mod variants;

pub use categories::{tree_order, CategoryState, CategoryTreeMigrator};
pub use customers::{migrate_customer, migrate_customers};
pub use media::{MediaAssetMigrator, ResolvedMedia};
pub use products::{migrate_product, migrate_products};
pub use reporter::{EntityIssue, MigrationReporter, MigrationSummary, ResourceStats};
pub use resolver::{EntityResolver, KeyedLocks, Upserted};
pub use variants::{price_amount, to_minor_units, ProductDraft, ProductVariantBuilder};
