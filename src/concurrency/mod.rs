//! Bounded concurrency and the shared rate-limit retry policy.
//!
//! Every fetch/write loop fans out through [`run_bounded`]; every network
//! call is wrapped in [`RetryPolicy::run`]. The scheduler itself never
//! retries, it only bounds how many items are in flight.

mod retry;
mod scheduler;

pub use retry::RetryPolicy;
pub use scheduler::{run_bounded, Outcome};
