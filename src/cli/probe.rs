//! Probe command handler.

use color_eyre::Result;

use crate::backends::{BackendSelector, InProcessRegistry, ProbeOutcome, ProbeReport};
use crate::config::{BackendMode, Config};

use super::App;

impl App {
    /// Run the probe command: select a backend and print every tier's verdict.
    pub async fn run_probe(
        &self,
        backend: Option<BackendMode>,
        registry: InProcessRegistry,
    ) -> Result<()> {
        let config = Config::load()?;
        let mode = backend.unwrap_or(config.target.backend);

        let selection = BackendSelector::new(registry, config.target.clone())
            .with_mode(mode)
            .with_verbose(self.verbose)
            .select()
            .await?;

        println!("{}", render_report(&selection.report));
        if let Some(kind) = selection.report.selected() {
            println!("selected: {}", kind);
        }
        Ok(())
    }
}

fn render_report(report: &ProbeReport) -> String {
    report
        .attempts
        .iter()
        .map(|attempt| match &attempt.outcome {
            ProbeOutcome::Accepted => format!("{:<8} accepted", attempt.kind.as_str()),
            ProbeOutcome::Rejected(reason) => {
                format!("{:<8} rejected: {}", attempt.kind.as_str(), reason)
            }
            ProbeOutcome::Skipped => format!("{:<8} skipped", attempt.kind.as_str()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
