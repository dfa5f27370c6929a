//! Migrate command handler.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use crate::backends::{BackendSelector, DryRunBackend, InProcessRegistry, TargetBackend};
use crate::config::{BackendMode, Config, SourceMode};
use crate::context::{retry_policy, IdMappings, MigrationContext};
use crate::engine::run_migration;
use crate::models::ResourceKind;
use crate::source;

use super::App;

/// Flags of the `migrate` command; each overrides the resolved config.
#[derive(Args, Debug, Clone, Default)]
pub struct MigrateArgs {
    /// Resources to migrate (comma separated)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub resources: Option<Vec<ResourceKind>>,

    /// Log target writes instead of performing them
    #[arg(long, alias = "dryRun")]
    pub dry_run: bool,

    /// Maximum entities in flight
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: Option<u32>,

    /// Currency of created prices
    #[arg(long)]
    pub currency_code: Option<String>,

    /// Target backend tier
    #[arg(long, value_enum)]
    pub backend: Option<BackendMode>,

    /// Source access mode
    #[arg(long, value_enum)]
    pub source: Option<SourceMode>,

    /// JSON file id mappings are resumed from and saved to
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

impl MigrateArgs {
    /// Applies the flags on top of file and environment configuration.
    pub fn apply(&self, config: &mut Config, verbose: bool) {
        if let Some(resources) = &self.resources {
            config.run.resources = resources.clone();
        }
        if self.dry_run {
            config.run.dry_run = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency as usize;
        }
        if let Some(currency) = &self.currency_code {
            config.run.currency_code = currency.trim().to_lowercase();
        }
        if let Some(backend) = self.backend {
            config.target.backend = backend;
        }
        if let Some(mode) = self.source {
            config.source.mode = mode;
        }
        if let Some(path) = &self.state_file {
            config.run.state_file = Some(path.clone());
        }
        if verbose {
            config.run.verbose = true;
        }
    }
}

impl App {
    /// Run the migrate command.
    pub async fn run_migrate(&self, args: &MigrateArgs, registry: InProcessRegistry) -> Result<()> {
        let mut config = Config::load()?;
        args.apply(&mut config, self.verbose);

        // Credentials are checked before any network or database I/O.
        config.validate_source()?;
        if config.target.backend == BackendMode::Http {
            config.validate_http_target()?;
        }

        let mut resources = config.run.resources.clone();
        resources.sort();
        resources.dedup();
        tracing::info!(
            "Migrating {:?} (concurrency {}, currency {}{})",
            resources,
            config.run.concurrency,
            config.run.currency_code,
            if config.run.dry_run { ", dry run" } else { "" }
        );

        let selection = BackendSelector::new(registry, config.target.clone())
            .with_verbose(config.run.verbose)
            .select()
            .await?;
        let backend: Arc<dyn TargetBackend> = if config.run.dry_run {
            Arc::new(DryRunBackend::new(selection.backend))
        } else {
            selection.backend
        };

        let source = source::connect(
            &config.source,
            &config.run.display_attributes,
            retry_policy(&config.run),
        )
        .await?;
        tracing::info!("Reading source in {:?} mode", source.mode());

        let mappings = match &config.run.state_file {
            Some(path) => IdMappings::load(path).await?,
            None => IdMappings::new(),
        };

        let ctx = MigrationContext::new(config, source, backend, mappings);
        let result = run_migration(&ctx, &resources).await;

        println!("{}", result.summary.render());
        if !result.is_success() {
            let failed: Vec<String> = result
                .errors
                .iter()
                .map(|(resource, error)| format!("{}: {}", resource, error))
                .collect();
            return Err(color_eyre::eyre::eyre!(
                "Migration finished with errors: {}",
                failed.join("; ")
            ));
        }
        Ok(())
    }
}
