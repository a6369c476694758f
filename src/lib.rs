//! CDN Delivery Service
//!
//! Resilient, access-controlled content delivery across multiple
//! third-party CDN providers: provider registry, health monitoring with
//! hysteresis, priority-ranked failover, signed URL generation, signing
//! key rotation with overlap windows, performance sampling, and alerting.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
