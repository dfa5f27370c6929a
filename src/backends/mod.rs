//! Target write backends.
//!
//! Three tiers share one adapter trait ([`TargetBackend`]):
//!
//! - [`module`]: in-process module API with bulk calls
//! - [`service`]: in-process legacy service API with singular calls
//! - [`http`]: remote admin API over HTTP
//!
//! [`selector`] fixes one of them for the run; [`dry_run`] wraps the chosen
//! backend when nothing should be written.

pub mod dry_run;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod module;
pub mod selector;
pub mod service;
pub mod traits;

pub use dry_run::DryRunBackend;
pub use http::{HttpAuth, HttpBackend};
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryCatalog;
pub use module::{ModuleApi, ModuleBackend};
pub use selector::{
    BackendSelector, InProcessRegistry, ProbeAttempt, ProbeOutcome, ProbeReport, Selection,
};
pub use service::{ServiceApi, ServiceBackend};
pub use traits::{BackendKind, TargetBackend};
