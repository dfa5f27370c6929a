//! Explicit per-run state shared by every resource migrator.
//!
//! Nothing here is global: a run is a function of its [`MigrationContext`],
//! so tests can build as many independent runs as they like.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::TargetBackend;
use crate::concurrency::RetryPolicy;
use crate::config::{Config, RunConfig};
use crate::error::AppError;
use crate::models::ResourceKind;
use crate::services::{EntityResolver, MediaAssetMigrator, MigrationReporter, ProductVariantBuilder};
use crate::source::CatalogSource;

// ============================================================================
// Id mappings
// ============================================================================

/// `source id → target id` per resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable(BTreeMap<ResourceKind, BTreeMap<i64, String>>);

/// Mutex-protected id mappings, loadable from and savable to a state file.
#[derive(Debug, Default)]
pub struct IdMappings {
    inner: Mutex<MappingTable>,
}

impl IdMappings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MappingTable> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, resource: ResourceKind, source_id: i64) -> Option<String> {
        self.lock()
            .0
            .get(&resource)
            .and_then(|m| m.get(&source_id))
            .cloned()
    }

    pub fn insert(&self, resource: ResourceKind, source_id: i64, target_id: &str) {
        self.lock()
            .0
            .entry(resource)
            .or_default()
            .insert(source_id, target_id.to_string());
    }

    pub fn len(&self, resource: ResourceKind) -> usize {
        self.lock().0.get(&resource).map_or(0, BTreeMap::len)
    }

    pub fn snapshot(&self) -> MappingTable {
        self.lock().clone()
    }

    /// Loads a state file; a missing file yields empty mappings.
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        if !tokio::fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "no state file, starting fresh");
            return Ok(Self::new());
        }
        let raw = tokio::fs::read(path).await?;
        let table: MappingTable = serde_json::from_slice(&raw)?;
        tracing::info!(path = %path.display(), "loaded id mappings");
        Ok(Self {
            inner: Mutex::new(table),
        })
    }

    /// Writes the mappings atomically (temp file + rename).
    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(path = %path.display(), "saved id mappings");
        Ok(())
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything one migration run reads from or writes to.
pub struct MigrationContext {
    pub config: Arc<Config>,
    pub source: Arc<dyn CatalogSource>,
    pub backend: Arc<dyn TargetBackend>,
    pub mappings: IdMappings,
    pub reporter: MigrationReporter,
    pub media: MediaAssetMigrator,
    pub resolver: EntityResolver,
    pub variants: ProductVariantBuilder,
}

impl MigrationContext {
    pub fn new(
        config: Config,
        source: Arc<dyn CatalogSource>,
        backend: Arc<dyn TargetBackend>,
        mappings: IdMappings,
    ) -> Self {
        let retry = retry_policy(&config.run);
        Self {
            reporter: MigrationReporter::new(config.run.verbose),
            media: MediaAssetMigrator::new(config.media.clone(), config.run.dry_run),
            resolver: EntityResolver::new(retry),
            variants: ProductVariantBuilder::new(
                &config.run.currency_code,
                &config.run.display_attributes,
            ),
            config: Arc::new(config),
            source,
            backend,
            mappings,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        self.resolver.retry()
    }

    pub fn concurrency(&self) -> usize {
        self.config.run.concurrency.max(1)
    }

    /// Persists the mappings when a state file is configured.
    ///
    /// Dry runs never write state: their ids are synthetic.
    pub async fn save_state(&self) -> Result<(), AppError> {
        match &self.config.run.state_file {
            Some(path) if !self.config.run.dry_run => self.mappings.save(path).await,
            _ => Ok(()),
        }
    }
}

/// The run's rate-limit policy.
pub fn retry_policy(run: &RunConfig) -> RetryPolicy {
    RetryPolicy::linear(
        run.max_rate_limit_retries,
        Duration::from_millis(run.rate_limit_step_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mappings_are_per_resource() {
        let mappings = IdMappings::new();
        mappings.insert(ResourceKind::Categories, 3, "pcat_1");
        mappings.insert(ResourceKind::Products, 3, "prod_1");

        assert_eq!(mappings.get(ResourceKind::Categories, 3).as_deref(), Some("pcat_1"));
        assert_eq!(mappings.get(ResourceKind::Products, 3).as_deref(), Some("prod_1"));
        assert_eq!(mappings.get(ResourceKind::Customers, 3), None);
        assert_eq!(mappings.len(ResourceKind::Categories), 1);
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let missing = IdMappings::load(&path).await.unwrap();
        assert_eq!(missing.snapshot(), MappingTable::default());

        let mappings = IdMappings::new();
        mappings.insert(ResourceKind::Categories, 7, "pcat_7");
        mappings.save(&path).await.unwrap();

        let loaded = IdMappings::load(&path).await.unwrap();
        assert_eq!(loaded.get(ResourceKind::Categories, 7).as_deref(), Some("pcat_7"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_retry_policy_from_run_config() {
        let policy = retry_policy(&RunConfig::default());
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
    }
}
