//! Target backend selection.
//!
//! Tiers are probed in [`BackendKind::PRIORITY`] order and the first one
//! whose capability check passes is fixed for the whole run. A forced mode
//! probes only that tier and fails loudly instead of downgrading.

use std::sync::Arc;

use crate::backends::http::HttpBackend;
use crate::backends::module::{ModuleApi, ModuleBackend};
use crate::backends::service::{ServiceApi, ServiceBackend};
use crate::backends::traits::{BackendKind, TargetBackend};
use crate::config::{BackendMode, TargetConfig};
use crate::error::AppError;

/// In-process APIs registered by the host before the run starts.
#[derive(Clone, Default)]
pub struct InProcessRegistry {
    pub module: ModuleApi,
    pub service: ServiceApi,
}

/// Result of probing one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Accepted,
    Rejected(String),
    /// Not probed because a higher tier was already accepted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub kind: BackendKind,
    pub outcome: ProbeOutcome,
}

/// Every probe made during selection, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub attempts: Vec<ProbeAttempt>,
}

impl ProbeReport {
    pub fn selected(&self) -> Option<BackendKind> {
        self.attempts
            .iter()
            .find(|a| a.outcome == ProbeOutcome::Accepted)
            .map(|a| a.kind)
    }

    fn push(&mut self, kind: BackendKind, outcome: ProbeOutcome) {
        self.attempts.push(ProbeAttempt { kind, outcome });
    }
}

/// The backend fixed for a run plus how it was chosen.
pub struct Selection {
    pub backend: Arc<dyn TargetBackend>,
    pub report: ProbeReport,
}

pub struct BackendSelector {
    mode: BackendMode,
    registry: InProcessRegistry,
    target: TargetConfig,
    verbose: bool,
}

impl BackendSelector {
    pub fn new(registry: InProcessRegistry, target: TargetConfig) -> Self {
        Self {
            mode: target.backend,
            registry,
            target,
            verbose: false,
        }
    }

    pub fn with_mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Probes tiers and returns the first accepted backend.
    pub async fn select(&self) -> Result<Selection, AppError> {
        let tiers: Vec<BackendKind> = match self.mode {
            BackendMode::Auto => BackendKind::PRIORITY.to_vec(),
            BackendMode::Module => vec![BackendKind::Module],
            BackendMode::Service => vec![BackendKind::Service],
            BackendMode::Http => vec![BackendKind::Http],
        };

        let mut report = ProbeReport::default();
        let mut selected: Option<Arc<dyn TargetBackend>> = None;
        let mut credentials_error: Option<AppError> = None;

        for kind in tiers {
            if selected.is_some() {
                report.push(kind, ProbeOutcome::Skipped);
                continue;
            }
            match self.probe(kind).await {
                Ok(backend) => {
                    tracing::info!(backend = %kind, "target backend accepted");
                    report.push(kind, ProbeOutcome::Accepted);
                    selected = Some(backend);
                }
                Err(err) => {
                    let reason = err.to_string();
                    tracing::debug!(backend = %kind, %reason, "target backend rejected");
                    report.push(kind, ProbeOutcome::Rejected(reason));
                    if err.is_fatal() {
                        credentials_error = Some(err);
                    }
                }
            }
        }

        if let Some(backend) = selected {
            return Ok(Selection { backend, report });
        }
        if let Some(err) = credentials_error {
            return Err(err);
        }

        let reasons = report
            .attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                ProbeOutcome::Rejected(reason) => Some(format!("{}: {}", a.kind, reason)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("; ");
        let backend = match self.mode {
            BackendMode::Auto => "auto".to_string(),
            BackendMode::Module => BackendKind::Module.to_string(),
            BackendMode::Service => BackendKind::Service.to_string(),
            BackendMode::Http => BackendKind::Http.to_string(),
        };
        Err(AppError::BackendUnavailable {
            backend,
            reason: reasons,
        })
    }

    async fn probe(&self, kind: BackendKind) -> Result<Arc<dyn TargetBackend>, AppError> {
        let unavailable = |reason: String| AppError::BackendUnavailable {
            backend: kind.to_string(),
            reason,
        };
        match kind {
            BackendKind::Module => {
                let backend = ModuleBackend::probe(&self.registry.module)
                    .await
                    .map_err(unavailable)?;
                Ok(Arc::new(backend))
            }
            BackendKind::Service => {
                let backend = ServiceBackend::probe(&self.registry.service)
                    .await
                    .map_err(unavailable)?;
                Ok(Arc::new(backend))
            }
            BackendKind::Http => {
                let backend = HttpBackend::from_config(&self.target, self.verbose)?;
                backend.probe().await.map_err(unavailable)?;
                Ok(Arc::new(backend))
            }
        }
    }
}
