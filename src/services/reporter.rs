//! Per-resource outcome counters and the final summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::AppError;
use crate::models::ResourceKind;

/// Counts for one resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ResourceStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }
}

/// A failure or warning recorded against one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityIssue {
    pub resource: ResourceKind,
    /// Natural key or source id of the entity.
    pub key: String,
    pub message: String,
}

/// Snapshot of everything the reporter has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub stats: BTreeMap<ResourceKind, ResourceStats>,
    pub failures: Vec<EntityIssue>,
    pub warnings: Vec<EntityIssue>,
}

impl MigrationSummary {
    pub fn stats(&self, resource: ResourceKind) -> ResourceStats {
        self.stats.get(&resource).copied().unwrap_or_default()
    }

    pub fn total_failed(&self) -> usize {
        self.stats.values().map(|s| s.failed).sum()
    }

    /// Renders the summary table printed at the end of a run.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:>8} {:>8} {:>8} {:>8}",
            "resource", "created", "updated", "skipped", "failed"
        );
        for (resource, stats) in &self.stats {
            let _ = writeln!(
                out,
                "{:<12} {:>8} {:>8} {:>8} {:>8}",
                resource.as_str(),
                stats.created,
                stats.updated,
                stats.skipped,
                stats.failed
            );
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "warnings: {}", self.warnings.len());
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

/// Thread-safe accumulator shared by every migrator of a run.
#[derive(Debug, Default)]
pub struct MigrationReporter {
    inner: Mutex<MigrationSummary>,
    verbose: bool,
}

impl MigrationReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            inner: Mutex::new(MigrationSummary::default()),
            verbose,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MigrationSummary> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self, resource: ResourceKind, outcome: Outcome) {
        let mut summary = self.lock();
        let stats = summary.stats.entry(resource).or_default();
        match outcome {
            Outcome::Created => stats.created += 1,
            Outcome::Updated => stats.updated += 1,
            Outcome::Skipped => stats.skipped += 1,
            Outcome::Failed => stats.failed += 1,
        }
    }

    /// Makes a resource show up in the summary even when it had no entities.
    pub fn touch(&self, resource: ResourceKind) {
        self.lock().stats.entry(resource).or_default();
    }

    pub fn created(&self, resource: ResourceKind, key: &str, target_id: &str) {
        tracing::info!(resource = %resource, key, target_id, "created");
        self.bump(resource, Outcome::Created);
    }

    pub fn updated(&self, resource: ResourceKind, key: &str, target_id: &str) {
        tracing::info!(resource = %resource, key, target_id, "updated");
        self.bump(resource, Outcome::Updated);
    }

    pub fn skipped(&self, resource: ResourceKind, key: &str, reason: &str) {
        tracing::info!(resource = %resource, key, reason, "skipped");
        self.bump(resource, Outcome::Skipped);
    }

    pub fn failed(&self, resource: ResourceKind, key: &str, error: &AppError) {
        tracing::error!(resource = %resource, key, error = %error, "failed");
        if self.verbose {
            if let Some(payload) = error.payload() {
                tracing::error!(resource = %resource, key, payload, "error payload");
            }
        }
        self.bump(resource, Outcome::Failed);
        self.lock().failures.push(EntityIssue {
            resource,
            key: key.to_string(),
            message: error.to_string(),
        });
    }

    /// Records a problem that did not stop the entity from migrating.
    pub fn warning(&self, resource: ResourceKind, key: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(resource = %resource, key, message = %message, "warning");
        self.lock().warnings.push(EntityIssue {
            resource,
            key: key.to_string(),
            message,
        });
    }

    pub fn summary(&self) -> MigrationSummary {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_resource() {
        let reporter = MigrationReporter::new(false);
        reporter.created(ResourceKind::Products, "tee", "prod_1");
        reporter.created(ResourceKind::Products, "cap", "prod_2");
        reporter.updated(ResourceKind::Products, "mug", "prod_3");
        reporter.skipped(ResourceKind::Customers, "a@b.c", "exists");
        reporter.failed(
            ResourceKind::Categories,
            "shoes",
            &AppError::Validation("bad".into()),
        );

        let summary = reporter.summary();
        assert_eq!(
            summary.stats(ResourceKind::Products),
            ResourceStats {
                created: 2,
                updated: 1,
                skipped: 0,
                failed: 0
            }
        );
        assert_eq!(summary.stats(ResourceKind::Customers).skipped, 1);
        assert_eq!(summary.total_failed(), 1);
        assert_eq!(summary.failures[0].key, "shoes");
    }

    #[test]
    fn test_render_lists_touched_resources() {
        let reporter = MigrationReporter::new(false);
        reporter.touch(ResourceKind::Categories);
        reporter.created(ResourceKind::Products, "tee", "prod_1");
        reporter.warning(ResourceKind::Products, "tee", "missing image");

        let table = reporter.summary().render();
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("resource"));
        assert!(lines[1].starts_with("categories"));
        assert!(lines[2].starts_with("products"));
        assert!(lines[2].contains("       1"));
        assert_eq!(lines[3], "warnings: 1");
    }
}
