//! CLI module for eav-migrate.
//!
//! Subcommands:
//! - `migrate`: Migrate categories, products and customers
//! - `probe`: Show which target backend tiers are usable

mod migrate;
mod probe;

use clap::{Parser, Subcommand};

use crate::backends::InProcessRegistry;
use crate::config::BackendMode;

pub use migrate::MigrateArgs;

/// eav-migrate - EAV catalog migration
#[derive(Parser)]
#[command(name = "eav-migrate")]
#[command(about = "Migrate an EAV commerce catalog, its categories and customers to a flat target")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Migrate the selected resources
    Migrate(MigrateArgs),

    /// Probe the target backend tiers without migrating anything
    Probe {
        /// Probe only this tier instead of the configured mode
        #[arg(long, value_enum)]
        backend: Option<BackendMode>,
    },
}

impl App {
    /// Run the CLI application with no in-process backends registered.
    pub async fn run(self) -> color_eyre::Result<()> {
        self.run_with(InProcessRegistry::default()).await
    }

    /// Run the CLI application against in-process APIs registered by a host.
    pub async fn run_with(self, registry: InProcessRegistry) -> color_eyre::Result<()> {
        match &self.command {
            Command::Migrate(args) => self.run_migrate(args, registry).await,
            Command::Probe { backend } => self.run_probe(*backend, registry).await,
        }
    }
}
