//! Shared library for cross-cutting concerns in the database secrets engine.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - Retry policies with exponential backoff
//! - Prometheus registry helpers scoped to a single engine instance
//! - A clock abstraction so schedulers can be driven deterministically
//! - Tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tracing_config;

pub use clock::{Clock, SystemClock};
pub use error::{PlatformError, Retryable};
pub use metrics::MetricsRegistry;
pub use retry::{RetryConfig, RetryPolicy};
pub use tracing_config::{init_tracing, TracingConfig};
