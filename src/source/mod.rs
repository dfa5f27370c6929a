//! Legacy platform readers.
//!
//! Two interchangeable readers implement [`CatalogSource`]:
//!
//! - [`rest::RestSource`] pages through the REST search endpoints
//! - [`relational::RelationalSource`] queries the entity and attribute
//!   tables directly and flattens them with [`AttributeFlattener`]
//!
//! Both return the same flattened snapshots from [`crate::models`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::concurrency::RetryPolicy;
use crate::config::{SourceConfig, SourceMode};
use crate::error::AppError;
use crate::models::{SourceCategory, SourceCustomer, SourceProduct};

pub mod flatten;
pub mod relational;
pub mod rest;

pub use flatten::{apply_option_labels, group_by_backend, AttributeFlattener, FlattenedEntities};
pub use relational::RelationalSource;
pub use rest::RestSource;

/// Read-only access to the legacy catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Which access mode this reader uses.
    fn mode(&self) -> SourceMode;

    /// Every category, in no particular order.
    async fn categories(&self) -> Result<Vec<SourceCategory>, AppError>;

    /// Every product, parents and children alike, in entity id order.
    async fn products(&self) -> Result<Vec<SourceProduct>, AppError>;

    /// Children of a configurable or grouping parent.
    async fn children(&self, parent: &SourceProduct) -> Result<Vec<SourceProduct>, AppError>;

    /// Every customer with its address book.
    async fn customers(&self) -> Result<Vec<SourceCustomer>, AppError>;
}

/// Opens the reader configured in `[source]`.
///
/// Credentials must have been validated already. `label_codes` are the
/// select attributes whose option ids the REST reader turns into labels.
pub async fn connect(
    config: &SourceConfig,
    label_codes: &[String],
    retry: RetryPolicy,
) -> Result<Arc<dyn CatalogSource>, AppError> {
    match config.mode {
        SourceMode::Rest => Ok(Arc::new(
            RestSource::from_config(config, retry)?.with_label_codes(label_codes),
        )),
        SourceMode::Relational => Ok(Arc::new(RelationalSource::from_config(config).await?)),
    }
}
