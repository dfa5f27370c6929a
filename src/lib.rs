//! eav-migrate - EAV catalog migration engine
//!
//! Moves categories, products and customers from a legacy EAV commerce
//! platform into a flat target catalog. Runs are resumable and idempotent.

pub mod backends;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod source;
